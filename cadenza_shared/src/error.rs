use thiserror::Error;

use crate::ListenerId;

/// Every failure the engine reports.
///
/// `State`, `NotFound` and `InvalidArgument` are returned synchronously to the caller.
/// `Listener` never is: it travels on the orchestrator's diagnostic channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid state: {0}")]
    State(String),
    #[error("player `{0}` does not exist")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("listener {id} failed: {message}")]
    Listener { id: ListenerId, message: String },
    #[error("could not load asset `{name}`: {message}")]
    Asset { name: String, message: String },
    #[error("session error: {0}")]
    Session(String),
    #[error("engine is not running")]
    Disconnected,
}

impl EngineError {
    pub fn not_started() -> Self {
        Self::State("orchestrator has not been started".to_string())
    }

    pub fn already_started() -> Self {
        Self::State("orchestrator is already started".to_string())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
