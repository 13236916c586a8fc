use futures::future::BoxFuture;
use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::Step;
use waypoint_core::types::{Delta, SharedState};

/// Writes a fixed delta built from its parameters.
///
/// ```yaml
/// approve:
///   kind: assign
///   quality: { review_status: approved }
///   log: "forced approval"
/// ```
pub struct AssignStep {
    delta: Delta,
}

impl AssignStep {
    pub fn new(delta: Delta) -> Self {
        Self { delta }
    }

    /// Build from step parameters `context`, `artifacts`, `quality` (objects)
    /// and `log` (a record or a list of records).
    pub fn from_params(step: &str, params: &Map<String, Value>) -> Result<Self> {
        let mut delta = Delta::new();
        delta.context = namespace_param(step, params, "context")?;
        delta.artifacts = namespace_param(step, params, "artifacts")?;
        delta.quality = namespace_param(step, params, "quality")?;

        match params.get("log") {
            None | Some(Value::Null) => {}
            Some(Value::Array(records)) => {
                for record in records {
                    delta = delta.with_log(record.clone());
                }
            }
            Some(record) => delta = delta.with_log(record.clone()),
        }

        Ok(Self { delta })
    }
}

fn namespace_param(step: &str, params: &Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(WaypointError::validation(
            format!("steps.{}.{}", step, key),
            format!("expected a mapping, found {}", type_name(other)),
        )),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

impl Step for AssignStep {
    fn kind(&self) -> &str {
        "assign"
    }

    fn execute<'a>(&'a self, _state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move { Ok(self.delta.clone()) })
    }
}
