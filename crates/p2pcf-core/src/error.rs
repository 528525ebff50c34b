use thiserror::Error;

pub type P2pResult<T> = Result<T, P2pError>;

#[derive(Debug, Error)]
pub enum P2pError {
    /// Malformed input rejected before any state was touched.
    #[error("validation error: {0}")]
    Validation(String),

    /// Signature or AEAD tag did not verify (bad handshake, wrong password).
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// Transit hash of a chunk did not match its payload.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A durable save failed; the in-memory mutation was rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("incomplete transfer: have {received} of {total} chunks")]
    IncompleteTransfer { received: usize, total: usize },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl P2pError {
    pub fn validation(msg: impl Into<String>) -> Self {
        P2pError::Validation(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        P2pError::Authentication(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        P2pError::Persistence(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        P2pError::Crypto(msg.into())
    }
}
