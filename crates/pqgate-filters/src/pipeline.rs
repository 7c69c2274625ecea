//! Decode, enrich, ingest and broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pqgate_core::config::FilterConfigs;
use pqgate_core::{DynLatestReadingSource, DynReadingPublisher, DynReadingSink, Reading};
use pqgate_devices::{decode_message, FrameHandler, SouthMessage};
use serde::Serialize;
use tracing::{debug, warn};

use crate::calibration::Calibration;
use crate::digital::DigitalEventGenerator;
use crate::error::{FilterError, Result};
use crate::limits::LimitEvaluator;
use crate::stage::Reconfigurable;

/// The enrichment stages of one pipeline.
pub struct FilterStages {
    pub calibration: Calibration,
    pub limits: LimitEvaluator,
    pub digital: DigitalEventGenerator,
}

impl FilterStages {
    pub fn new(source: DynLatestReadingSource, fetch_timeout: Duration) -> Self {
        Self {
            calibration: Calibration::new(),
            limits: LimitEvaluator::default(),
            digital: DigitalEventGenerator::new(source, fetch_timeout),
        }
    }

    /// Build the stages and apply the initial configurations.
    pub fn from_config(
        configs: &FilterConfigs,
        source: DynLatestReadingSource,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let stages = Self::new(source, fetch_timeout);
        if let Some(json) = &configs.calibration {
            stages.calibration.reconfigure(json)?;
        }
        if let Some(json) = &configs.limits {
            stages.limits.reconfigure(json)?;
        }
        if let Some(json) = &configs.digital {
            stages.digital.reconfigure(json)?;
        }
        Ok(stages)
    }

    /// Look a stage up by the name used on the configuration endpoints.
    pub fn get(&self, name: &str) -> Option<&dyn Reconfigurable> {
        match name {
            "calibration" => Some(&self.calibration),
            "limits" => Some(&self.limits),
            "digital" => Some(&self.digital),
            _ => None,
        }
    }

    pub fn reconfigure(&self, name: &str, json: &str) -> Result<()> {
        self.get(name)
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?
            .reconfigure(json)
    }

    pub fn names() -> [&'static str; 3] {
        ["calibration", "limits", "digital"]
    }

    /// Run every stage over a decoded reading.
    pub async fn enrich(&self, reading: &mut Reading) {
        self.calibration.apply(reading);
        self.limits.apply(reading);
        self.digital.process(reading).await;
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    raw: AtomicU64,
    ingested: AtomicU64,
    ingest_failures: AtomicU64,
    deliveries: AtomicU64,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames: u64,
    pub raw: u64,
    pub ingested: u64,
    pub ingest_failures: u64,
    pub deliveries: u64,
}

/// Processes south messages end to end.
pub struct Pipeline {
    stages: Arc<FilterStages>,
    sink: DynReadingSink,
    publisher: Option<DynReadingPublisher>,
    counters: Counters,
}

impl Pipeline {
    pub fn new(stages: Arc<FilterStages>, sink: DynReadingSink) -> Self {
        Self {
            stages,
            sink,
            publisher: None,
            counters: Counters::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: DynReadingPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn stages(&self) -> &Arc<FilterStages> {
        &self.stages
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            raw: self.counters.raw.load(Ordering::Relaxed),
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            ingest_failures: self.counters.ingest_failures.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
        }
    }

    /// Decode and enrich one message. Returns `None` when the topic names
    /// no known message kind.
    pub async fn prepare(&self, message: &SouthMessage) -> Option<Reading> {
        let Some(mut reading) = decode_message(&message.asset, &message.topic, &message.payload)
        else {
            debug!(topic = %message.topic, "Ignoring message with unknown kind");
            return None;
        };

        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        if reading.is_raw() {
            self.counters.raw.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stages.enrich(&mut reading).await;
        }
        Some(reading)
    }

    /// Hand a finished reading to the sink and the publisher. A broadcast
    /// failure never keeps the reading from the sink.
    pub async fn deliver(&self, reading: &Reading) {
        let ingest = self.sink.ingest(reading);
        let publish = async {
            match &self.publisher {
                Some(publisher) => publisher.publish(reading).await,
                None => 0,
            }
        };
        let (ingested, delivered) = tokio::join!(ingest, publish);

        match ingested {
            Ok(()) => {
                self.counters.ingested.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.ingest_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    asset = %reading.asset,
                    sink = self.sink.name(),
                    error = %e,
                    "Failed to ingest reading"
                );
            }
        }
        self.counters
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub async fn process(&self, message: SouthMessage) -> Option<Reading> {
        let reading = self.prepare(&message).await?;
        self.deliver(&reading).await;
        Some(reading)
    }
}

#[async_trait]
impl FrameHandler for Pipeline {
    async fn handle(&self, message: SouthMessage) {
        self.process(message).await;
    }
}
