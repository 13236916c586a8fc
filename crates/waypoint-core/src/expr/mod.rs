//! Guard expressions: a sandboxed boolean language over the shared state.
//!
//! Expressions read dotted paths rooted at `context`, `artifacts` or
//! `quality`, compare them with literals or each other, and combine the
//! results with `and`, `or` and `not`. There are no calls, no arithmetic, no
//! loops and no way to name anything outside the three namespaces, so a
//! compiled expression always terminates and cannot touch the host.
//!
//! ```text
//! quality.review_status == 'approved' and quality.attempts < 3
//! artifacts.draft is not None
//! not (context.mode == "dry-run" or quality.error)
//! ```
//!
//! Compilation is strict; evaluation is forgiving. A path that walks through
//! a missing key or a non-object resolves to `None`, and ordering comparisons
//! between values of different types are simply false.

mod eval;
mod lexer;
mod parser;

use thiserror::Error;

use crate::types::SharedState;

pub use parser::MAX_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("Expression syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Identifier '{identifier}' is not allowed; paths must start with context, artifacts or quality")]
    DisallowedIdentifier { identifier: String },
}

/// A compiled guard expression.
///
/// Compiled once at load time and evaluated many times; `Send + Sync` and
/// cheap to share across runs.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Option<parser::Expr>,
}

impl Expression {
    /// Compile an expression. Empty or whitespace-only text yields an
    /// expression that never holds.
    pub fn compile(text: &str) -> Result<Self, ExprError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::never());
        }
        let tokens = lexer::tokenize(trimmed)?;
        let ast = parser::parse(&tokens)?;
        Ok(Self {
            source: trimmed.to_string(),
            ast: Some(ast),
        })
    }

    /// The expression that always evaluates to `false`.
    pub fn never() -> Self {
        Self {
            source: String::new(),
            ast: None,
        }
    }

    /// Source text as compiled (trimmed).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True for the "no condition configured" expression.
    pub fn is_empty(&self) -> bool {
        self.ast.is_none()
    }

    pub fn evaluate(&self, state: &SharedState) -> bool {
        match &self.ast {
            Some(ast) => eval::evaluate(ast, state),
            None => false,
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Expression {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn state(value: Value) -> SharedState {
        serde_json::from_value(value).expect("state literal")
    }

    fn eval(expr: &str, value: Value) -> bool {
        Expression::compile(expr)
            .unwrap_or_else(|e| panic!("{expr:?} failed to compile: {e}"))
            .evaluate(&state(value))
    }

    #[test]
    fn test_attempts_threshold() {
        assert!(eval("quality.attempts > 2", json!({"quality": {"attempts": 3}})));
        assert!(!eval("quality.attempts > 2", json!({"quality": {}})));
    }

    #[test]
    fn test_missing_paths_are_none() {
        let s = json!({"artifacts": {"draft": "text"}});
        assert!(eval("artifacts.summary is None", s.clone()));
        assert!(eval("artifacts.draft.words is None", s.clone()));
        assert!(eval("context.a.b.c is None", s.clone()));
        assert!(eval("artifacts.draft is not None", s.clone()));
        assert!(!eval("artifacts.draft.words == 'x'", s.clone()));
        assert!(!eval("artifacts.draft.words < 1", s.clone()));
        assert!(!eval("artifacts.draft.words >= 1", s));
    }

    #[test]
    fn test_none_ordering_is_false_both_ways() {
        let s = json!({});
        assert!(!eval("quality.x > 2", s.clone()));
        assert!(!eval("quality.x < 2", s.clone()));
        assert!(!eval("quality.x <= 2", s.clone()));
        assert!(eval("quality.x != 2", s.clone()));
        assert!(eval("quality.x == None", s));
    }

    #[test]
    fn test_boolean_routing_flags() {
        let ok = json!({"quality": {"ok": true}});
        let not_ok = json!({"quality": {"ok": false}});
        assert!(eval("quality.ok == True", ok.clone()));
        assert!(!eval("quality.ok == True", not_ok.clone()));
        assert!(eval("quality.ok", ok));
        assert!(eval("not quality.ok", not_ok));
    }

    #[test]
    fn test_numeric_flags_match_booleans() {
        let one = json!({"quality": {"ok": 1, "retry": 0}});
        assert!(eval("quality.ok == True", one.clone()));
        assert!(eval("quality.retry == False", one.clone()));
        assert!(eval("quality.ok > quality.retry", one.clone()));
        assert!(!eval("quality.ok == 'True'", one));
        assert!(!eval("quality.ok == True", json!({"quality": {"ok": 2}})));
    }

    #[test]
    fn test_grouped_operands_keep_their_value() {
        let s = json!({"quality": {"attempts": 3, "status": "done"}});
        assert!(eval("(quality.attempts) > 2", s.clone()));
        assert!(eval("((quality.attempts)) == 3", s.clone()));
        assert!(eval("(quality.status) == 'done'", s.clone()));
        assert!(eval("(artifacts.draft) is None", s.clone()));
        assert!(!eval("(quality.status) is None", s.clone()));
        assert!(eval("1 < (quality.attempts) <= 3", s.clone()));
        // Boolean-shaped groups still yield True or False.
        assert!(eval("(quality.attempts > 2) == True", s.clone()));
        assert!(!eval("(quality.status)", json!({"quality": {"status": ""}})));
    }

    #[test]
    fn test_keyword_field_names_and_large_literals() {
        let s = json!({"quality": {"true": "yes", "count": 18446744073709551615u64}});
        assert!(eval("quality.true == 'yes'", s.clone()));
        assert!(eval("quality.count == 18446744073709551615", s.clone()));
        assert!(eval("quality.count > 9223372036854775807", s));
    }

    #[test]
    fn test_string_comparisons_with_either_quote() {
        let s = json!({"quality": {"status": "done"}});
        assert!(eval("quality.status == 'done'", s.clone()));
        assert!(eval(r#"quality.status == "done""#, s.clone()));
        assert!(eval("quality.status != 'draft'", s));
    }

    #[test]
    fn test_logical_combinations() {
        let s = json!({
            "context": {"mode": "live"},
            "quality": {"review_status": "revise", "attempts": 3}
        });
        assert!(eval(
            "quality.review_status == 'approved' or quality.attempts >= 3",
            s.clone()
        ));
        assert!(!eval(
            "quality.review_status == 'approved' and quality.attempts >= 3",
            s.clone()
        ));
        assert!(eval(
            "not (context.mode == 'dry-run' or quality.error is not None)",
            s.clone()
        ));
        assert!(eval("0 < quality.attempts <= 3", s.clone()));
        assert!(!eval("0 < quality.attempts < 3", s));
    }

    #[test]
    fn test_nested_paths() {
        let s = json!({"context": {"briefing": {"product": {"name": "Widget"}}}});
        assert!(eval("context.briefing.product.name == 'Widget'", s.clone()));
        assert!(eval("context.briefing", s));
    }

    #[test]
    fn test_bare_root_truthiness() {
        assert!(!eval("artifacts", json!({})));
        assert!(eval("artifacts", json!({"artifacts": {"a": 1}})));
    }

    #[test]
    fn test_numeric_literals() {
        let s = json!({"quality": {"score": 0.85, "delta": -2}});
        assert!(eval("quality.score >= 0.8", s.clone()));
        assert!(eval("quality.delta == -2", s.clone()));
        assert!(eval("quality.score > quality.delta", s));
    }

    #[test]
    fn test_empty_expression_never_holds() {
        for text in ["", "   ", "\n\t"] {
            let expr = Expression::compile(text).unwrap();
            assert!(expr.is_empty());
            assert!(!expr.evaluate(&SharedState::default()));
        }
        assert!(!Expression::never().evaluate(&state(json!({"quality": {"ok": true}}))));
    }

    #[test]
    fn test_rejects_host_access() {
        assert!(matches!(
            Expression::compile("os.system('x')"),
            Err(ExprError::DisallowedIdentifier { .. })
        ));
        assert!(matches!(
            Expression::compile("__import__('x')"),
            Err(ExprError::DisallowedIdentifier { .. })
        ));
        assert!(Expression::compile("quality.run()").is_err());
        assert!(Expression::compile("[x for x in quality.items]").is_err());
        assert!(Expression::compile("quality.a + 1 > 2").is_err());
        assert!(Expression::compile("lambda: 1").is_err());
    }

    #[test]
    fn test_source_is_trimmed() {
        let expr: Expression = "  quality.ok  ".parse().unwrap();
        assert_eq!(expr.source(), "quality.ok");
        assert_eq!(expr.to_string(), "quality.ok");
    }

    #[test]
    fn test_error_messages() {
        let err = Expression::compile("quality.a ==").unwrap_err();
        assert!(err.to_string().starts_with("Expression syntax error at position 12"));

        let err = Expression::compile("env.HOME == 'x'").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Identifier 'env' is not allowed; paths must start with context, artifacts or quality"
        );
    }

    #[test]
    fn test_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Expression>();
    }
}
