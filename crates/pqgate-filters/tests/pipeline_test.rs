//! End-to-end pipeline behaviour over real frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pqgate_core::{
    FieldValue, MemoryReadingSource, MemorySink, Reading, ReadingPublisher, ReadingSink,
};
use pqgate_devices::{AssetWorkers, SouthMessage};
use pqgate_filters::{FilterStages, Pipeline, Reconfigurable};

const TIME: [u8; 6] = [30, 15, 9, 3, 15, 6];

fn tail(out: &mut Vec<u8>, flag: bool) {
    out.extend_from_slice(&TIME);
    out.extend_from_slice(&24u16.to_le_bytes());
    out.push(flag as u8);
}

fn analog_frame(channels: [f32; 4]) -> Vec<u8> {
    let mut out = Vec::new();
    for c in channels {
        out.extend_from_slice(&c.to_le_bytes());
    }
    tail(&mut out, true);
    out
}

fn digital_frame(bits: [u8; 8]) -> Vec<u8> {
    let mut out = bits.to_vec();
    tail(&mut out, false);
    out
}

#[derive(Default)]
struct CapturingPublisher {
    published: Mutex<Vec<Reading>>,
}

#[async_trait]
impl ReadingPublisher for CapturingPublisher {
    async fn publish(&self, reading: &Reading) -> usize {
        self.published.lock().push(reading.clone());
        1
    }
}

struct StalledPublisher;

#[async_trait]
impl ReadingPublisher for StalledPublisher {
    async fn publish(&self, _reading: &Reading) -> usize {
        tokio::time::sleep(Duration::from_millis(50)).await;
        0
    }
}

struct FailingSink;

#[async_trait]
impl ReadingSink for FailingSink {
    async fn ingest(&self, _reading: &Reading) -> pqgate_core::Result<()> {
        Err(pqgate_core::Error::Network("storage unavailable".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn stages() -> Arc<FilterStages> {
    let stages = FilterStages::new(Arc::new(MemoryReadingSource::new()), Duration::from_secs(1));
    stages
        .calibration
        .reconfigure(
            r#"{"VDC_MULT_FACTOR": 10.0, "ADC_DIV_FACTOR": 4.0,
                "TAP_TOLERANCE": 0.5, "TAP_POSITIONS": [{"VALUE": 4.0, "TAP": 7}]}"#,
        )
        .unwrap();
    stages
        .limits
        .reconfigure(r#"{"PARAMETERS": [{"battery_voltage": [{"LOWER_LIMIT": 0}, {"UPPER_LIMIT": 5}]}]}"#)
        .unwrap();
    stages
        .digital
        .reconfigure(
            r#"{"DIGITAL_CHANNELS": [{"Channel": 1}, {"Channel": 2}],
                "DIGITAL_CHANNEL_NAME": [{"Digi1": "Breaker"}, {"Digi2": "Trip"}],
                "DIGITAL_CHANNEL_TYPE": [{"Digi1": "SP1"}, {"Digi2": "SP1"}],
                "DIGITAL_CHANNEL_STATE": [{"SP1": [{"0": "OPEN"}, {"1": "CLOSE"}]}]}"#,
        )
        .unwrap();
    Arc::new(stages)
}

#[tokio::test]
async fn test_analog_frame_is_enriched_and_delivered() {
    let sink = Arc::new(MemorySink::new());
    let publisher = Arc::new(CapturingPublisher::default());
    let pipeline = Pipeline::new(stages(), sink.clone()).with_publisher(publisher.clone());

    let frame = analog_frame([1.0, 2.0, 3.0, 4.0]);
    pipeline
        .process(SouthMessage::new("STMS1", "STMS1/adstop", frame))
        .await
        .unwrap();

    let stored = sink.readings();
    assert_eq!(stored.len(), 1);
    let reading = &stored[0];
    assert_eq!(reading.timestamp, "2024-06-15 09:15:30");
    assert_eq!(reading.get("IsNlf"), Some(&FieldValue::Boolean(true)));
    assert_eq!(reading.get("battery_voltage"), Some(&FieldValue::Float(10.0)));
    assert_eq!(reading.get("battery_current"), Some(&FieldValue::Float(0.5)));
    assert_eq!(reading.get("tap_position"), Some(&FieldValue::Integer(7)));
    // Limits see fields added by calibration.
    assert_eq!(reading.get("Parameter1"), Some(&FieldValue::String("battery_voltage".into())));
    assert_eq!(reading.get("LimitViolation1"), Some(&FieldValue::String("UPPER".into())));

    assert_eq!(publisher.published.lock().as_slice(), stored.as_slice());
    let stats = pipeline.stats();
    assert_eq!((stats.frames, stats.ingested, stats.deliveries), (1, 1, 1));
}

#[tokio::test]
async fn test_digital_events_across_frames() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(stages(), sink.clone());

    for bits in [[0, 0, 0, 0, 0, 0, 0, 0], [0, 1, 0, 0, 0, 0, 0, 0], [0, 1, 1, 1, 0, 0, 0, 0]] {
        pipeline
            .process(SouthMessage::new("STMS1", "STMS1/ddstop", digital_frame(bits)))
            .await;
    }

    let stored = sink.readings();
    assert!(stored[0].get("name1").is_none());
    assert_eq!(stored[1].get("name1"), Some(&FieldValue::String("Trip".into())));
    assert_eq!(stored[1].get("state1"), Some(&FieldValue::String("CLOSE".into())));
    // Unnamed channels never produce events.
    assert!(stored[2].get("name1").is_none());
}

#[tokio::test]
async fn test_ingest_failure_does_not_block_broadcast() {
    let publisher = Arc::new(CapturingPublisher::default());
    let pipeline = Pipeline::new(stages(), Arc::new(FailingSink)).with_publisher(publisher.clone());

    pipeline
        .process(SouthMessage::new("STMS1", "STMS1/adstop", analog_frame([0.0; 4])))
        .await;

    assert_eq!(publisher.published.lock().len(), 1);
    let stats = pipeline.stats();
    assert_eq!(stats.ingest_failures, 1);
    assert_eq!(stats.ingested, 0);
}

#[tokio::test]
async fn test_slow_broadcast_still_ingests() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(stages(), sink.clone()).with_publisher(Arc::new(StalledPublisher));

    pipeline
        .process(SouthMessage::new("STMS1", "STMS1/adstop", analog_frame([0.0; 4])))
        .await;
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_workers_feed_the_pipeline() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Arc::new(Pipeline::new(stages(), sink.clone()));
    let workers = AssetWorkers::new(pipeline.clone(), 32);

    for asset in ["A", "B"] {
        for _ in 0..3 {
            let topic = format!("{}/adstop", asset);
            assert!(workers.dispatch(SouthMessage::new(asset, topic, analog_frame([1.0; 4]))));
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.len(), 6);
    assert_eq!(pipeline.stats().frames, 6);
    workers.shutdown();
}
