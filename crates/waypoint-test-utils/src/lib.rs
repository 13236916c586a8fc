//! Scripted steps, completion clients and process fixtures for tests.

pub mod fixtures;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::{CompletionClient, Step};
use waypoint_core::types::{Delta, Namespace, SharedState};

/// Build a context namespace from a JSON object literal.
///
/// Panics if `value` is not an object.
pub fn context(value: Value) -> Namespace {
    match value {
        Value::Object(map) => map,
        other => panic!("context must be a JSON object, got {}", other),
    }
}

type DeltaFn = dyn Fn(&SharedState) -> Result<Delta> + Send + Sync;

/// A step backed by a closure. Counts its invocations.
#[derive(Clone)]
pub struct FnStep {
    function: Arc<DeltaFn>,
    calls: Arc<AtomicUsize>,
}

impl FnStep {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&SharedState) -> Result<Delta> + Send + Sync + 'static,
    {
        Self {
            function: Arc::new(function),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always sets `artifacts[key] = value`.
    pub fn artifact(key: &'static str, value: Value) -> Self {
        Self::new(move |_| Ok(Delta::new().with_artifact(key, value.clone())))
    }

    /// Always sets `quality[key] = value`.
    pub fn quality(key: &'static str, value: Value) -> Self {
        Self::new(move |_| Ok(Delta::new().with_quality(key, value.clone())))
    }

    /// Appends `{"agent": name}` to the log and nothing else.
    pub fn log(name: &'static str) -> Self {
        Self::new(move |_| Ok(Delta::new().with_log(json!({ "agent": name }))))
    }

    /// Number of times the step has run. Clones share the counter.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Step for FnStep {
    fn kind(&self) -> &str {
        "test"
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.function)(state)
        })
    }
}

/// A step whose unit of work always fails.
pub struct FailingStep {
    message: String,
}

impl FailingStep {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Step for FailingStep {
    fn execute<'a>(&'a self, _state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(async move { Err(WaypointError::Io(std::io::Error::other(self.message.clone()))) })
    }
}

/// A step that never completes. Useful for cancellation tests.
pub struct PendingStep;

impl Step for PendingStep {
    fn execute<'a>(&'a self, _state: &'a SharedState) -> BoxFuture<'a, Result<Delta>> {
        Box::pin(futures::future::pending())
    }
}

/// Completion client that replays a script of replies.
///
/// Each call pops the next entry: `Ok(text)` is returned as the completion,
/// `Err(message)` as a [`WaypointError::Completion`]. When the script runs
/// out, the last entry repeats. Prompts are recorded for inspection.
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    last: Mutex<Option<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<std::result::Result<&str, &str>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|entry| entry.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text)])
    }

    /// Always fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message)])
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete<'a>(&'a self, _model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(entry) => {
                    *last = Some(entry.clone());
                    Some(entry)
                }
                None => last.clone(),
            }
        };
        Box::pin(async move {
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(WaypointError::Completion(message)),
                None => Err(WaypointError::Completion("script is empty".into())),
            }
        })
    }
}
