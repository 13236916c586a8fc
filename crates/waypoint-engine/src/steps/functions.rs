use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use waypoint_core::error::Result;
use waypoint_core::types::{Delta, SharedState};

/// A synchronous state transformation usable by `deterministic` and `judge` steps.
pub type StepFn = Arc<dyn Fn(&SharedState) -> Result<Delta> + Send + Sync>;

/// Named functions that process descriptions can refer to.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, StepFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in functions:
    ///
    /// - `noop`: returns an empty delta.
    /// - `clear_error`: resets `quality.error` to `None`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("noop", |_state: &SharedState| Ok(Delta::new()));
        registry.register("clear_error", |_state: &SharedState| {
            Ok(Delta::new().with_quality("error", Value::Null))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&SharedState) -> Result<Delta> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<StepFn> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.list())
            .finish()
    }
}
