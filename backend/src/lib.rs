pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod logging;
pub mod models;
pub mod routes;
pub mod test_util;

pub use config::{Config, ConfigError, DispatchConfig};
pub use dispatch::{DispatchStats, Dispatcher, PendingHandle, RejectedError, ValidationError, Validator};
pub use error::ApiError;
pub use llm::{BackendClient, BackendError, InferenceBackend, OllamaBackend};
pub use models::{ChatRequest, ChatResult, FailureKind};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub validator: Validator,
    /// Owns the backend client and the worker pool.
    pub dispatcher: Dispatcher,
}
