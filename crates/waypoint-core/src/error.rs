use thiserror::Error;

use crate::expr::ExprError;

#[derive(Debug, Error)]
pub enum WaypointError {
    // Expression errors
    #[error(transparent)]
    Expression(#[from] ExprError),

    // Process description errors
    #[error("Invalid process description at {element}: {message}")]
    Validation { element: String, message: String },

    #[error("Invalid condition at {element}: {source}")]
    InvalidCondition {
        element: String,
        #[source]
        source: ExprError,
    },

    #[error("Failed to parse process description {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Process description not found: {0}")]
    ProcessNotFound(String),

    // Execution errors
    #[error("No unit of work registered for step '{0}'")]
    StepNotRegistered(String),

    #[error("Step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Completion request failed: {0}")]
    Completion(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaypointError {
    /// Shorthand for a [`WaypointError::Validation`] on a named element.
    pub fn validation(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            element: element.into(),
            message: message.into(),
        }
    }

    /// Whether this error is raised while loading a process, before anything runs.
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            Self::Expression(_)
                | Self::Validation { .. }
                | Self::InvalidCondition { .. }
                | Self::Parse { .. }
                | Self::ProcessNotFound(_)
                | Self::StepNotRegistered(_)
        )
    }

    /// Whether this error came from a step's unit of work during a run.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::StepExecution { .. })
    }
}

pub type Result<T> = std::result::Result<T, WaypointError>;
