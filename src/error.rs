//! Leaf error types for each component, composed by orchestration-level `anyhow::Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned an error response: {0}")]
    Response(String),

    #[error("provider authentication/configuration missing: {0}")]
    Configuration(String),

    #[error("provider process is no longer available")]
    Disposed,

    #[error("provider produced a degenerate transcript")]
    Degenerate,
}

impl ProviderError {
    /// Shutdown-race errors are recognized and downgraded rather than propagated (spec §7).
    pub fn is_shutdown_race(&self) -> bool {
        matches!(self, ProviderError::Disposed)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue for source is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("summary analysis call failed: {0}")]
    Summary(#[source] ProviderError),

    #[error("task extraction call failed: {0}")]
    TaskExtraction(#[source] ProviderError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing configuration: {0}")]
    Configuration(String),

    #[error("session is already recording")]
    AlreadyRecording,

    #[error("session is not recording")]
    NotRecording,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence collaborator error: {0}")]
    Backend(String),
}
