use thiserror::Error;

/// Errors at the engine boundary. Validation failures never create an
/// execution record.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("device_id is required")]
    MissingDevice,

    #[error("script_name is required")]
    MissingScript,

    #[error("script `{0}` is not registered")]
    UnknownScript(String),

    #[error("execution `{0}` not found")]
    ExecutionNotFound(String),

    #[error("execution `{0}` already exists and is still running")]
    ExecutionCollision(String),
}

impl EngineError {
    /// Whether the error is the caller's fault (4xx) rather than ours.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::MissingDevice | EngineError::MissingScript | EngineError::UnknownScript(_)
        )
    }
}
