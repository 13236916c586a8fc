use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Target name that ends a run.
pub const TERMINAL: &str = "__end__";

/// An open key-value namespace inside the shared state.
pub type Namespace = Map<String, Value>;

/// A structured record appended to the run log.
pub type Record = Map<String, Value>;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three namespaces a guard expression may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Root {
    Context,
    Artifacts,
    Quality,
}

impl Root {
    pub const ALL: [Root; 3] = [Root::Context, Root::Artifacts, Root::Quality];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "context" => Some(Root::Context),
            "artifacts" => Some(Root::Artifacts),
            "quality" => Some(Root::Quality),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Root::Context => "context",
            Root::Artifacts => "artifacts",
            Root::Quality => "quality",
        }
    }
}

impl std::fmt::Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State threaded through a run.
///
/// A step never mutates the state it receives. Each step returns a [`Delta`]
/// and the engine produces a fresh `SharedState` from the previous one, so
/// every intermediate value is an inspectable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    #[serde(default)]
    pub context: Namespace,
    #[serde(default)]
    pub artifacts: Namespace,
    #[serde(default)]
    pub quality: Namespace,
    #[serde(default)]
    pub log: Vec<Record>,
}

impl SharedState {
    /// Fresh state for a run: caller context, everything else empty.
    pub fn new(context: Namespace) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    /// Borrow one of the three namespaces.
    pub fn namespace(&self, root: Root) -> &Namespace {
        match root {
            Root::Context => &self.context,
            Root::Artifacts => &self.artifacts,
            Root::Quality => &self.quality,
        }
    }

    /// Produce the next state by merging `delta` into this one.
    pub fn apply(&self, delta: &Delta) -> SharedState {
        crate::merge::apply(self, delta)
    }
}

/// Partial update produced by one step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Namespace,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub artifacts: Namespace,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub quality: Namespace,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<Record>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a context key.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set an artifact.
    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Set a quality metric or flag.
    pub fn with_quality(mut self, key: impl Into<String>, value: Value) -> Self {
        self.quality.insert(key.into(), value);
        self
    }

    /// Append a log record. Non-object values are wrapped as `{"message": value}`.
    pub fn with_log(mut self, record: Value) -> Self {
        self.log.push(into_record(record));
        self
    }

    /// Record a recoverable failure in `quality.error`.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.with_quality("error", Value::String(message.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.artifacts.is_empty()
            && self.quality.is_empty()
            && self.log.is_empty()
    }

    /// Fold `later` into this delta. For deltas touching disjoint keys,
    /// applying the result equals applying `self` then `later`.
    pub fn combine(&self, later: &Delta) -> Delta {
        crate::merge::combine(self, later)
    }
}

/// Wrap an arbitrary JSON value as a log record.
pub fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("message".to_string(), other);
            map
        }
    }
}

/// Why a run reached the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process-wide done condition became true.
    DoneCondition,
    /// An edge pointing at the terminal marker was taken.
    TerminalEdge,
    /// No guard held and the step had no fallback edge.
    NoSuccessor,
}

/// Why the router picked the next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteReason {
    /// The done condition held; edges were not consulted.
    DoneCondition,
    /// A guarded edge held. `index` is its position among the step's guarded edges.
    Guard { index: usize, condition: String },
    /// No guard held and the fallback edge was taken.
    Fallback,
    /// No guard held and there was no fallback.
    NoSuccessor,
}

/// Events published while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        start: String,
    },
    StepStarted {
        run_id: RunId,
        step: String,
        iteration: usize,
    },
    StepCompleted {
        run_id: RunId,
        step: String,
        elapsed_ms: u64,
        log_records: usize,
    },
    StepFailed {
        run_id: RunId,
        step: String,
        error: String,
    },
    Transition {
        run_id: RunId,
        from: String,
        to: String,
        reason: RouteReason,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        steps_executed: usize,
    },
    RunFailed {
        run_id: RunId,
        error: String,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::StepFailed { run_id, .. }
            | RunEvent::Transition { run_id, .. }
            | RunEvent::RunFinished { run_id, .. }
            | RunEvent::RunFailed { run_id, .. } => run_id,
        }
    }

    /// True for the last event of a run.
    pub fn is_final(&self) -> bool {
        matches!(self, RunEvent::RunFinished { .. } | RunEvent::RunFailed { .. })
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed { reason: Termination },
    /// The step budget ran out before the terminal state was reached.
    Aborted { limit: usize },
    /// The caller cancelled the run.
    Cancelled,
}

/// Result of a run that did not fail with an execution error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub state: SharedState,
    pub steps_executed: usize,
    /// Step names in execution order.
    pub path: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    /// True when the run reached the terminal state normally.
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed { .. })
    }

    /// True when the loop bound stopped the run.
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }

    /// Error recorded in `quality.error` by a step that degraded gracefully.
    pub fn recorded_error(&self) -> Option<&Value> {
        self.state.quality.get("error").filter(|v| !v.is_null())
    }

    pub fn artifacts(&self) -> &Namespace {
        &self.state.artifacts
    }

    pub fn quality(&self) -> &Namespace {
        &self.state.quality
    }

    pub fn log(&self) -> &[Record] {
        &self.state.log
    }
}
