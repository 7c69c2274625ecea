//! Error types for the south side.

use pqgate_core::MessageKind;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for transport adapters and HTTP collaborators.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Communication error
    #[error("Communication error: {0}")]
    Communication(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Communication(format!("request timed out: {}", e))
        } else if e.is_connect() {
            AdapterError::Connection(e.to_string())
        } else {
            AdapterError::Communication(e.to_string())
        }
    }
}

impl From<rumqttc::ClientError> for AdapterError {
    fn from(e: rumqttc::ClientError) -> Self {
        AdapterError::Communication(e.to_string())
    }
}

impl From<AdapterError> for pqgate_core::Error {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Configuration(m) => pqgate_core::Error::Config(m),
            AdapterError::Connection(m) => pqgate_core::Error::Network(m),
            AdapterError::Communication(m) => pqgate_core::Error::Device(m),
        }
    }
}

/// Why a payload could not be decoded as a structured frame.
///
/// Never surfaced to pipeline callers; it selects the raw fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{kind} payload is {actual} bytes, layout needs {expected}")]
    SizeMismatch {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },

    #[error("unpack failed at offset {offset}: {reason}")]
    Unpack { offset: usize, reason: String },
}

impl From<DecodeError> for pqgate_core::Error {
    fn from(e: DecodeError) -> Self {
        pqgate_core::Error::Decode(e.to_string())
    }
}
