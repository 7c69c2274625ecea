//! Enrichment stages and the south-to-north pipeline.
//!
//! - [`calibration`]: analog channel scaling and tap lookup
//! - [`limits`]: limit violation groups
//! - [`digital`]: digital state-change events
//! - [`pipeline`]: decode, enrich, ingest and broadcast

pub mod calibration;
pub mod digital;
pub mod error;
pub mod limits;
pub mod pipeline;
pub mod stage;

pub use calibration::{Calibration, CalibrationConfig, TapPosition};
pub use digital::{DigitalConfig, DigitalEvent, DigitalEventGenerator, PointType};
pub use error::{FilterError, Result};
pub use limits::{Bounds, LimitEvaluator, LimitTable, Violation};
pub use pipeline::{FilterStages, Pipeline, PipelineStats};
pub use stage::Reconfigurable;
