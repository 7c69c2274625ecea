//! Unified error handling for pqgate.
//!
//! Every crate keeps its own focused error enum and converts into this one
//! at crate boundaries, so callers that only need to report a failure can
//! work with a single type.

/// Unified error type for pqgate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Frame decoding errors.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Filter stage errors.
    #[error("Filter error: {0}")]
    Filter(String),

    /// Device transport errors (MQTT, HTTP collaborators).
    #[error("Device error: {0}")]
    Device(String),

    /// Fan-out errors.
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// Filesystem errors.
    #[error("I/O error: {0}")]
    Io(String),

    /// Network-related errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
