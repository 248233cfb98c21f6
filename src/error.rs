//! Error types for turnstile

use std::io;

/// Main error type for the proxy
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request head parsed but carries no usable target.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Upstream {target} unreachable: {reason}")]
    Upstream { target: String, reason: String },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Error::Proxy(msg.into())
    }

    pub fn pattern(msg: impl Into<String>) -> Self {
        Error::Pattern(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedRequest(msg.into())
    }

    pub fn upstream(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Upstream {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
