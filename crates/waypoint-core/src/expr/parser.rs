use serde_json::Value;

use super::lexer::{Token, TokenKind};
use super::ExprError;
use crate::types::Root;

/// Maximum nesting of parentheses and `not` operators.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    /// `a < b <= c` holds when every adjacent pair holds.
    Compare {
        first: Operand,
        rest: Vec<(CmpOp, Operand)>,
    },
    IsNone {
        operand: Operand,
        negated: bool,
    },
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(Path),
    Literal(Value),
    Group(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A dotted path rooted at one of the state namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub root: Root,
    pub segments: Vec<String>,
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.root.as_str())?;
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

pub fn parse(tokens: &[Token]) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(
            trailing,
            format!("unexpected {} after expression", trailing.kind.describe()),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &'a Token {
        // The token stream always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            position: token.position,
            message: message.into(),
        }
    }

    fn enter(&mut self, token: &Token) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_at(
                token,
                format!("expression nests deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut terms = vec![self.parse_and()?];
        while self.eat(&TokenKind::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut terms = vec![self.parse_not()?];
        while self.eat(&TokenKind::And) {
            terms.push(self.parse_not()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        let token = self.peek();
        if token.kind == TokenKind::Not {
            self.advance();
            self.enter(token)?;
            let inner = self.parse_not()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.parse_operand()?;

        if self.eat(&TokenKind::Is) {
            let negated = self.eat(&TokenKind::Not);
            let token = self.advance();
            if token.kind != TokenKind::None {
                return Err(self.error_at(
                    token,
                    format!(
                        "'is' may only be followed by 'None' or 'not None', found {}",
                        token.kind.describe()
                    ),
                ));
            }
            return Ok(Expr::IsNone {
                operand: first,
                negated,
            });
        }

        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            self.advance();
            rest.push((op, self.parse_operand()?));
        }

        if rest.is_empty() {
            Ok(Expr::Operand(first))
        } else {
            Ok(Expr::Compare { first, rest })
        }
    }

    fn comparison_op(&self) -> Option<CmpOp> {
        match self.peek().kind {
            TokenKind::Eq => Some(CmpOp::Eq),
            TokenKind::Ne => Some(CmpOp::Ne),
            TokenKind::Lt => Some(CmpOp::Lt),
            TokenKind::Le => Some(CmpOp::Le),
            TokenKind::Gt => Some(CmpOp::Gt),
            TokenKind::Ge => Some(CmpOp::Ge),
            _ => None,
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ExprError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Ident(name) => self.parse_path(name),
            TokenKind::Number(n) => Ok(Operand::Literal(Value::Number(n.clone()))),
            TokenKind::Str(s) => Ok(Operand::Literal(Value::String(s.clone()))),
            TokenKind::True => Ok(Operand::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Operand::Literal(Value::Bool(false))),
            TokenKind::None => Ok(Operand::Literal(Value::Null)),
            TokenKind::LParen => {
                self.enter(token)?;
                let inner = self.parse_or()?;
                self.leave();
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(self.error_at(
                        close,
                        format!("expected ')' but found {}", close.kind.describe()),
                    ));
                }
                Ok(Operand::Group(Box::new(inner)))
            }
            other => Err(self.error_at(
                token,
                format!("expected a value or path but found {}", other.describe()),
            )),
        }
    }

    fn parse_path(&mut self, name: &str) -> Result<Operand, ExprError> {
        let root = Root::parse(name).ok_or_else(|| ExprError::DisallowedIdentifier {
            identifier: name.to_string(),
        })?;

        let mut segments = Vec::new();
        while self.eat(&TokenKind::Dot) {
            let token = self.advance();
            match &token.kind {
                TokenKind::Ident(segment) => segments.push(segment.clone()),
                other => {
                    return Err(self.error_at(
                        token,
                        format!("expected a field name after '.' but found {}", other.describe()),
                    ))
                }
            }
        }

        if self.peek().kind == TokenKind::LParen {
            return Err(self.error_at(self.peek(), "function calls are not allowed"));
        }

        Ok(Operand::Path(Path { root, segments }))
    }
}
