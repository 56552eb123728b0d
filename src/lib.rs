pub mod app_config;
pub mod config;
pub mod config_file;
pub mod errors;
pub mod health;
pub mod interpret;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod sanitize;
pub mod types;

pub use crate::app_config::AppConfig;
pub use crate::config_file::ProviderConfig;
pub use crate::errors::{AttemptError, InterpretError, PipelineError, ProviderError, StageError};
pub use crate::interpret::interpret;
pub use crate::pipeline::{Orchestrator, PipelineConfig, PipelineResult, PipelineStatus};
pub use crate::providers::{CompletionProvider, CompletionRequest, CompletionResult, InvocationSelector};
pub use crate::retry::RetryController;
pub use crate::types::{ModelId, RunId};
