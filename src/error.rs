use thiserror::Error;

/// Errors surfaced by the ingestion and query paths.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The request cannot be served as given (unknown metric kind, malformed payload, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller gave up or the pipeline is shutting down. Safe to retry elsewhere.
    #[error("operation cancelled")]
    Cancelled,

    /// The ingestion queue is at capacity and the event was dropped.
    #[error("ingestion queue is full")]
    QueueFull,

    #[error("storage failure: {0}")]
    StorageFailure(#[source] anyhow::Error),
}

impl TrackError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type TrackResult<T> = Result<T, TrackError>;
