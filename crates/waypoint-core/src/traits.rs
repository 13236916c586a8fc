use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Delta, SharedState};

/// A unit of work in a process.
///
/// A step reads the current state and returns the partial update it wants
/// merged. It never sees a mutable state. Returning `Err` fails the run;
/// recoverable problems belong in the delta (see [`Delta::with_error`]).
pub trait Step: Send + Sync + 'static {
    /// Short label for the kind of step, used in logs.
    fn kind(&self) -> &str {
        "custom"
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<Delta>>;
}

/// Text completion backend used by `llm` steps.
pub trait CompletionClient: Send + Sync + 'static {
    /// Complete `prompt` with the named model.
    fn complete<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}
