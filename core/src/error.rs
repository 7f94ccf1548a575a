//! Error types for the relay gateway

use thiserror::Error;

use crate::link::Dialect;

/// Main error type for the relay gateway
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    /// The peer sent more bytes than fit in one protocol line.
    #[error("Framing error: line exceeds {0} bytes")]
    Framing(usize),

    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// A dialect reached a code path it has no translation for.
    #[error("{operation} is not supported on {dialect} links")]
    Unsupported {
        dialect: Dialect,
        operation: &'static str,
    },

    #[error("No free placeholder nickname left")]
    NickExhausted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    /// Errors after which the link they happened on cannot continue.
    pub fn is_link_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Framing(_) | Error::LinkClosed(_) | Error::Unsupported { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
