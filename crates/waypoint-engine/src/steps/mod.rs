//! Built-in step kinds and the factory that builds them from step declarations.
//!
//! | kind            | does                                                        |
//! |-----------------|-------------------------------------------------------------|
//! | `llm` (default) | renders a prompt and stores a completion in `artifacts`     |
//! | `deterministic` | runs a named function from the [`FunctionRegistry`]         |
//! | `judge`         | reviews an artifact and sets `quality.review_status`        |
//! | `assign`        | writes literal values from its parameters                   |

pub mod assign;
pub mod deterministic;
pub mod factory;
pub mod functions;
pub mod judge;
pub mod llm;

use serde_json::{json, Value};

pub use assign::AssignStep;
pub use deterministic::DeterministicStep;
pub use factory::StepFactory;
pub use functions::{FunctionRegistry, StepFn};
pub use judge::JudgeStep;
pub use llm::{LlmStep, SimulatedCompletion};

/// Audit record appended by built-in steps.
pub(crate) fn audit(agent: &str, kind: &str) -> Value {
    json!({ "agent": agent, "kind": kind })
}
