use futures::future::BoxFuture;

use waypoint_core::error::Result;
use waypoint_core::traits::Step;
use waypoint_core::types::{Delta, SharedState};

use super::{audit, StepFn};

/// Runs a registered function and stamps an audit record on its output.
pub struct DeterministicStep {
    name: String,
    function: StepFn,
}

impl DeterministicStep {
    pub fn new(name: impl Into<String>, function: StepFn) -> Self {
        Self {
            name: name.into(),
            function,
        }
    }
}

impl Step for DeterministicStep {
    fn kind(&self) -> &str {
        "deterministic"
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move {
            let delta = (self.function)(state)?;
            Ok(delta.with_log(audit(&self.name, "deterministic")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use waypoint_core::error::WaypointError;

    #[tokio::test]
    async fn test_audit_record_follows_function_log() {
        let function: StepFn = Arc::new(|_: &SharedState| {
            Ok(Delta::new()
                .with_artifact("x", json!(1))
                .with_log(json!({"note": "computed"})))
        });
        let step = DeterministicStep::new("calc", function);

        let delta = step.execute(&SharedState::default()).await.unwrap();
        assert_eq!(delta.artifacts["x"], json!(1));
        assert_eq!(delta.log.len(), 2);
        assert_eq!(delta.log[0]["note"], json!("computed"));
        assert_eq!(delta.log[1]["agent"], json!("calc"));
        assert_eq!(delta.log[1]["kind"], json!("deterministic"));
    }

    #[tokio::test]
    async fn test_function_error_propagates() {
        let function: StepFn = Arc::new(|_: &SharedState| {
            Err(WaypointError::StepExecution {
                step: "calc".into(),
                message: "division by zero".into(),
            })
        });
        let step = DeterministicStep::new("calc", function);
        assert!(step.execute(&SharedState::default()).await.is_err());
    }
}
