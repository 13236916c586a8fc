use std::collections::HashMap;
use std::sync::Arc;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::Step;
use waypoint_core::types::{Delta, SharedState};

/// Units of work keyed by step name.
///
/// Built once per engine and shared read-only across its runs.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, step: impl Step) {
        self.steps.insert(name.into(), Arc::new(step));
    }

    /// Register an already shared step.
    pub fn register_arc(&mut self, name: impl Into<String>, step: Arc<dyn Step>) {
        self.steps.insert(name.into(), step);
    }

    /// Unregister a step by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.steps.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the step registered under `name` against `state`.
    pub async fn execute(&self, name: &str, state: &SharedState) -> Result<Delta> {
        let step = self
            .steps
            .get(name)
            .ok_or_else(|| WaypointError::StepNotRegistered(name.to_string()))?;
        step.execute(state).await
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.list())
            .finish()
    }
}
