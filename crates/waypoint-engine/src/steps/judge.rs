use futures::future::BoxFuture;
use serde_json::{json, Value};

use waypoint_core::error::Result;
use waypoint_core::traits::Step;
use waypoint_core::types::{Delta, SharedState};

use super::StepFn;

pub const APPROVED: &str = "approved";
pub const REVISE: &str = "revise";

/// Reviews an artifact and records the verdict in `quality`.
///
/// The default rule approves when the artifact's text is longer than
/// `min_length` characters and always bumps `quality.attempts`, so a
/// reviewer loop can be bounded with a guard like `quality.attempts >= 3`.
/// A custom rule replaces the heuristic entirely.
pub struct JudgeStep {
    name: String,
    artifact: String,
    min_length: usize,
    purpose: Option<String>,
    rule: Option<StepFn>,
}

impl JudgeStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: "draft".to_string(),
            min_length: 200,
            purpose: None,
            rule: None,
        }
    }

    /// Artifact key to review.
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = artifact.into();
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_rule(mut self, rule: StepFn) -> Self {
        self.rule = Some(rule);
        self
    }

    fn default_rule(&self, state: &SharedState) -> Delta {
        let length = match state.artifacts.get(&self.artifact) {
            Some(Value::String(text)) => Some(text.chars().count()),
            Some(object @ Value::Object(_)) => Some(object.to_string().chars().count()),
            _ => None,
        };
        let status = match length {
            Some(len) if len > self.min_length => APPROVED,
            _ => REVISE,
        };

        Delta::new()
            .with_quality("review_status", json!(status))
            .with_quality("attempts", json!(attempts(state) + 1))
            .with_log(json!({ "agent": self.name, "kind": "judge", "rule": "default" }))
    }
}

/// Current `quality.attempts`, tolerating floats and numeric strings.
fn attempts(state: &SharedState) -> i64 {
    match state.quality.get("attempts") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

impl Step for JudgeStep {
    fn kind(&self) -> &str {
        "judge"
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move {
            match &self.rule {
                Some(rule) => {
                    let delta = rule(state)?;
                    Ok(delta.with_log(json!({
                        "agent": self.name,
                        "kind": "judge",
                        "purpose": self.purpose,
                    })))
                }
                None => Ok(self.default_rule(state)),
            }
        })
    }
}
