use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Empty or oversized query/document. Surfaced to the caller as-is.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No fitted vocabulary yet (e.g. zero documents indexed).
    #[error("Index unavailable: no fitted vocabulary")]
    IndexUnavailable,

    #[error("Storage error: {0}")]
    Storage(String),

    /// The remote cache tier could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Error::Storage(e.to_string()) }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::Storage(format!("serialization: {e}")) }
}

pub type Result<T> = std::result::Result<T, Error>;
