//! Error types for ballast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Construction Errors ===
    #[error("Unsupported store backend: {0}")]
    UnsupportedStore(String),

    #[error("Store connection failed: {0}")]
    Connection(String),

    // === Write-path Errors ===
    #[error("Failed to encode {entity}: {source}")]
    Encoding {
        entity: String,
        #[source]
        source: serde_json::Error,
    },

    // === Watch-path Errors ===
    #[error("Failed to decode stored entry: {0}")]
    Decode(String),

    // === Allocation Errors ===
    #[error("No VIPs available")]
    NoVipAvailable,

    #[error("Invalid address range: {0}")]
    InvalidRange(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Transport Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Http(_))
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
