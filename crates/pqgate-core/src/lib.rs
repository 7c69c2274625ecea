//! Core types for the pqgate telemetry gateway.
//!
//! This crate holds what every other pqgate crate shares: the reading
//! model, topic conventions, the unified error type, collaborator traits
//! and application configuration.

pub mod collaborator;
pub mod config;
pub mod error;
pub mod logging;
pub mod reading;
pub mod topic;

pub use collaborator::{
    DynLatestReadingSource, DynReadingPublisher, DynReadingSink, IngestRecord,
    LatestReadingSource, LogSink, MemoryReadingSource, MemorySink, ReadingPublisher, ReadingSink,
};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use reading::{FieldValue, Fields, Reading, RAW_FIELD, TIMESTAMP_FORMAT};
pub use topic::{topic_category, MessageKind};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::collaborator::{LatestReadingSource, ReadingPublisher, ReadingSink};
    pub use crate::error::{Error, Result};
    pub use crate::reading::{FieldValue, Fields, Reading};
    pub use crate::topic::MessageKind;
}
