pub mod config;
pub mod error;
pub mod event;
pub mod expr;
pub mod merge;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, WaypointError};
pub use event::EventBus;
pub use expr::{ExprError, Expression};
pub use types::*;
pub use traits::{CompletionClient, Step};
