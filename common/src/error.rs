use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DimmerError {
    #[error("a fade is in progress")]
    Busy,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("timer is already running")]
    AlreadyRunning,
    #[error("settings storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("failed to schedule deferred callback: {0}")]
    SchedulingFailure(String),
}

impl DimmerError {
    /// Whether the same request may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy | Self::StorageUnavailable(_))
    }
}
