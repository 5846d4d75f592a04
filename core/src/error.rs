use thiserror::Error;

/// Errors surfaced by the index service and the hybrid orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown index id or document id
    #[error("not found: {0}")]
    NotFound(String),
    /// Rejected input (bad id, column, parameter)
    #[error("invalid input: {0}")]
    Validation(String),
    /// Snapshot or cache could not be encoded/decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// Embedding provider or vector index failed or timed out
    #[error("upstream service failed: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Upstream failures are transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
