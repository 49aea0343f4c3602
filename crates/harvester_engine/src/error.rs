use std::io;

use thiserror::Error;

/// Failure reported by an external collaborator (peer, scraper, store, ...).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("http status {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CollaboratorError::RateLimited(_))
    }
}

#[derive(Debug, Error)]
#[error("invalid value '{value}' for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// A timeline could not be turned into a push payload.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("could not encode push payload: {0}")]
    Encode(#[from] serde_json::Error),
}
