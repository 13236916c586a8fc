pub mod engine;
pub mod registry;
pub mod run_log;
pub mod steps;

pub use engine::{Engine, EngineOptions};
pub use registry::StepRegistry;
pub use run_log::RunLogger;
pub use steps::{FunctionRegistry, SimulatedCompletion, StepFactory};
