//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the remoting broker.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (bad names, bad API maps, bad config).
    #[error("validation error: {0}")]
    Validation(String),

    /// Object or connection not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A wire index that does not resolve through an object's API map.
    #[error("invalid index: {0}")]
    InvalidIndex(String),

    /// Framing or packet-body violations.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Value encoding/decoding failures.
    #[error("codec error: {0}")]
    Codec(String),

    /// The exposed object rejected or failed a call.
    #[error("invocation failed: {0}")]
    Invocation(String),

    /// Internal errors (actor gone, channel closed).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code used as a structured log field.
    pub fn diagnostic_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidIndex(_) => "OUT_OF_RANGE",
            Error::Protocol(_) => "PROTOCOL",
            Error::Codec(_) => "DATA_LOSS",
            Error::Invocation(_) => "ABORTED",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "INTERNAL",
            Error::Io(_) => "UNAVAILABLE",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_index(msg: impl Into<String>) -> Self {
        Self::InvalidIndex(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Codec(format!("msgpack encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Codec(format!("msgpack decode: {}", err))
    }
}
