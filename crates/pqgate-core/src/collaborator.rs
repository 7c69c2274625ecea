//! Interfaces to the systems the pipeline talks to but does not own.
//!
//! The pipeline hands every reading to a [`ReadingSink`] exactly once and
//! publishes it live through a [`ReadingPublisher`]. The digital event
//! generator seeds its previous-state cache from a [`LatestReadingSource`].
//! Concrete HTTP implementations live in
//! `pqgate-devices`; the in-memory ones here back tests and offline runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::Result;
use crate::reading::{CanonicalReading, Fields, Reading};

/// Durable storage for enriched readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Store one reading.
    async fn ingest(&self, reading: &Reading) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Source of the most recently stored reading for an asset.
#[async_trait]
pub trait LatestReadingSource: Send + Sync {
    /// Fields of the latest reading, or `None` if the asset has none yet.
    async fn latest(&self, asset: &str) -> Result<Option<Fields>>;
}

/// Live fan-out of enriched readings to subscribers.
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    /// Deliver a reading; returns the number of subscribers reached.
    async fn publish(&self, reading: &Reading) -> usize;
}

pub type DynReadingSink = Arc<dyn ReadingSink>;
pub type DynLatestReadingSource = Arc<dyn LatestReadingSource>;
pub type DynReadingPublisher = Arc<dyn ReadingPublisher>;

/// Record shape used when forwarding readings north.
#[derive(Serialize)]
pub struct IngestRecord<'a> {
    pub asset: &'a str,
    pub readings: CanonicalReading<'a>,
    pub timestamp: &'a str,
}

impl<'a> IngestRecord<'a> {
    pub fn new(reading: &'a Reading) -> Self {
        Self {
            asset: &reading.asset,
            readings: reading.canonical(),
            timestamp: &reading.timestamp,
        }
    }
}

/// Sink that only logs what it receives.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ReadingSink for LogSink {
    async fn ingest(&self, reading: &Reading) -> Result<()> {
        tracing::info!(
            asset = %reading.asset,
            topic = %reading.topic,
            fields = reading.fields.len(),
            "Reading ingested"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Sink that keeps every reading in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    readings: Mutex<Vec<Reading>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.lock().is_empty()
    }
}

#[async_trait]
impl ReadingSink for MemorySink {
    async fn ingest(&self, reading: &Reading) -> Result<()> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Latest-reading source backed by a map. An empty one answers `None`
/// for every asset.
#[derive(Debug, Default)]
pub struct MemoryReadingSource {
    latest: RwLock<HashMap<String, Fields>>,
}

impl MemoryReadingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asset: impl Into<String>, fields: Fields) {
        self.latest.write().insert(asset.into(), fields);
    }
}

#[async_trait]
impl LatestReadingSource for MemoryReadingSource {
    async fn latest(&self, asset: &str) -> Result<Option<Fields>> {
        Ok(self.latest.read().get(asset).cloned())
    }
}
