//! Digital state-change events.
//!
//! Compares each configured digital channel of a DDS frame with the value
//! last seen for the same asset and appends one group of event fields per
//! channel whose state changed. SinglePoint channels carry one bit;
//! DoublePoint channels combine a channel with its successor into a two
//! bit value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use pqgate_core::{DynLatestReadingSource, FieldValue, Fields, MessageKind, Reading};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FilterError, Result};
use crate::stage::{ConfigSlot, Reconfigurable};

const STAGE: &str = "digital";

/// Label used when a state table has no entry for a value.
pub const UNKNOWN_STATE: &str = "UNKNOWN";

/// Field name of digital channel `n`.
pub fn channel_id(n: u32) -> String {
    format!("Digi{}", n)
}

/// Digital point type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointType {
    /// One channel, values 0..=1
    SinglePoint,
    /// Two adjacent channels, values 0..=3
    DoublePoint,
}

impl PointType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "SP1" => Some(Self::SinglePoint),
            "DP1" => Some(Self::DoublePoint),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::SinglePoint => "SP1",
            Self::DoublePoint => "DP1",
        }
    }

    pub fn bits(&self) -> i64 {
        match self {
            Self::SinglePoint => 1,
            Self::DoublePoint => 2,
        }
    }
}

/// A named, evaluated channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalChannel {
    pub id: String,
    pub name: String,
    pub point: PointType,
    /// Second channel of a DoublePoint pair
    pub partner: Option<String>,
}

/// One emitted state change.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalEvent {
    pub name: String,
    pub channel: String,
    pub value: i64,
    pub state: String,
    pub bits: i64,
}

impl DigitalEvent {
    fn write_to(&self, reading: &mut Reading, rank: usize) {
        reading.add(format!("name{}", rank), self.name.as_str());
        reading.add(format!("channel{}", rank), self.channel.as_str());
        reading.add(format!("di_value{}", rank), self.value);
        reading.add(format!("state{}", rank), self.state.as_str());
        reading.add(format!("bits{}", rank), self.bits);
    }
}

/// Compiled digital configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitalConfig {
    /// Named channels in declared order. The second channel of a
    /// DoublePoint pair is folded into its first.
    pub channels: Vec<DigitalChannel>,
    pub states: HashMap<PointType, HashMap<i64, String>>,
}

#[derive(Deserialize)]
struct RawChannel {
    #[serde(rename = "Channel")]
    number: u32,
}

#[derive(Deserialize)]
struct RawDigitalConfig {
    #[serde(rename = "DIGITAL_CHANNELS", default)]
    channels: Vec<RawChannel>,

    #[serde(rename = "DIGITAL_CHANNEL_NAME", default)]
    names: Vec<IndexMap<String, Option<String>>>,

    #[serde(rename = "DIGITAL_CHANNEL_TYPE", default)]
    types: Vec<IndexMap<String, Option<String>>>,

    #[serde(rename = "DIGITAL_CHANNEL_STATE", default)]
    states: Vec<IndexMap<String, Vec<IndexMap<String, String>>>>,
}

fn point_type(code: &str, context: &str) -> Result<PointType> {
    PointType::from_code(code).ok_or_else(|| {
        FilterError::validation(STAGE, format!("unknown point type {:?} for {}", code, context))
    })
}

impl DigitalConfig {
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw: RawDigitalConfig =
            serde_json::from_value(value.clone()).map_err(|e| FilterError::parse(STAGE, e))?;

        let names: HashMap<String, String> = raw
            .names
            .into_iter()
            .flatten()
            .filter_map(|(id, name)| name.map(|n| (id, n)))
            .collect();

        let mut types = HashMap::new();
        for (id, code) in raw.types.into_iter().flatten() {
            if !names.contains_key(&id) {
                continue;
            }
            if let Some(code) = code {
                types.insert(id.clone(), point_type(&code, &id)?);
            }
        }

        let configured: HashSet<String> = raw.channels.iter().map(|c| channel_id(c.number)).collect();

        let mut channels = Vec::new();
        let mut paired: HashSet<String> = HashSet::new();
        for raw_channel in &raw.channels {
            let id = channel_id(raw_channel.number);
            if paired.contains(&id) {
                continue;
            }
            let Some(name) = names.get(&id) else {
                continue;
            };
            let point = types.get(&id).copied().unwrap_or(PointType::SinglePoint);
            let partner = match point {
                PointType::SinglePoint => None,
                PointType::DoublePoint => {
                    let partner = raw_channel
                        .number
                        .checked_add(1)
                        .map(channel_id)
                        .ok_or_else(|| {
                            FilterError::validation(STAGE, format!("DP1 channel {} has no partner", id))
                        })?;
                    if !configured.contains(&partner) {
                        return Err(FilterError::validation(
                            STAGE,
                            format!("DP1 channel {} needs {} to be configured", id, partner),
                        ));
                    }
                    paired.insert(partner.clone());
                    Some(partner)
                }
            };
            channels.push(DigitalChannel {
                id,
                name: name.clone(),
                point,
                partner,
            });
        }

        let mut states = HashMap::new();
        for (code, entries) in raw.states.into_iter().flatten() {
            let point = point_type(&code, "DIGITAL_CHANNEL_STATE")?;
            let table: &mut HashMap<i64, String> = states.entry(point).or_default();
            for (key, label) in entries.into_iter().flatten() {
                let value = key.trim().parse::<i64>().map_err(|_| {
                    FilterError::validation(STAGE, format!("state key {:?} of {} is not an integer", key, code))
                })?;
                table.insert(value, label);
            }
        }

        Ok(Self { channels, states })
    }

    /// Channel ids whose values are remembered between frames.
    pub fn tracked_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for channel in &self.channels {
            ids.push(channel.id.as_str());
            if let Some(partner) = &channel.partner {
                ids.push(partner.as_str());
            }
        }
        ids
    }

    pub fn label(&self, point: PointType, value: i64) -> String {
        self.states
            .get(&point)
            .and_then(|table| table.get(&value))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_STATE.to_string())
    }

    /// Events for channels whose combined value differs from `previous`,
    /// in declared channel order.
    pub fn evaluate(
        &self,
        current: impl Fn(&str) -> i64,
        previous: &HashMap<String, i64>,
    ) -> Vec<DigitalEvent> {
        let prev = |id: &str| previous.get(id).copied().unwrap_or(0);
        let mut events = Vec::new();

        for channel in &self.channels {
            let (value, before) = match &channel.partner {
                Some(partner) => (
                    current(&channel.id) + current(partner) * 2,
                    prev(&channel.id) + prev(partner) * 2,
                ),
                None => (current(&channel.id), prev(&channel.id)),
            };

            if value != before {
                events.push(DigitalEvent {
                    name: channel.name.clone(),
                    channel: channel.id.clone(),
                    value,
                    state: self.label(channel.point, value),
                    bits: channel.point.bits(),
                });
            }
        }
        events
    }
}

fn snapshot_of(fields: &Fields) -> HashMap<String, i64> {
    fields
        .iter()
        .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
        .collect()
}

/// The digital event stage.
pub struct DigitalEventGenerator {
    slot: ConfigSlot<DigitalConfig>,
    previous: DashMap<String, HashMap<String, i64>>,
    source: DynLatestReadingSource,
    fetch_timeout: Duration,
}

impl DigitalEventGenerator {
    pub fn new(source: DynLatestReadingSource, fetch_timeout: Duration) -> Self {
        Self {
            slot: ConfigSlot::new(STAGE, DigitalConfig::default(), Value::Object(Map::new())),
            previous: DashMap::new(),
            source,
            fetch_timeout,
        }
    }

    pub fn config(&self) -> Arc<DigitalConfig> {
        self.slot.current()
    }

    pub fn is_warm(&self, asset: &str) -> bool {
        self.previous.contains_key(asset)
    }

    /// Previous values remembered for an asset.
    pub fn previous(&self, asset: &str) -> Option<HashMap<String, i64>> {
        self.previous.get(asset).map(|entry| entry.value().clone())
    }

    /// Seed the previous-value cache of `asset` from its latest stored
    /// reading. Runs at most once per asset; a failed or timed out fetch
    /// seeds an empty baseline.
    pub async fn warm_up(&self, asset: &str) {
        if self.is_warm(asset) {
            return;
        }

        let seeded = match tokio::time::timeout(self.fetch_timeout, self.source.latest(asset)).await {
            Ok(Ok(Some(fields))) => snapshot_of(&fields),
            Ok(Ok(None)) => {
                debug!(asset = %asset, "No stored reading, starting from empty state");
                HashMap::new()
            }
            Ok(Err(e)) => {
                warn!(asset = %asset, error = %e, "Failed to fetch previous digital state");
                HashMap::new()
            }
            Err(_) => {
                warn!(
                    asset = %asset,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "Timed out fetching previous digital state"
                );
                HashMap::new()
            }
        };

        self.previous.entry(asset.to_string()).or_insert(seeded);
    }

    /// Compare a digital reading with the cached state, append events and
    /// replace the cached state. Returns the number of events written.
    pub fn apply(&self, reading: &mut Reading) -> usize {
        let config = self.slot.current();
        let current = |id: &str| reading.get(id).and_then(FieldValue::as_i64).unwrap_or(0);

        let previous = self.previous(&reading.asset).unwrap_or_default();
        let events = config.evaluate(&current, &previous);

        let snapshot: HashMap<String, i64> = config
            .tracked_ids()
            .into_iter()
            .map(|id| (id.to_string(), current(id)))
            .collect();
        self.previous.insert(reading.asset.clone(), snapshot);

        if !events.is_empty() {
            debug!(asset = %reading.asset, events = events.len(), "Digital state changed");
        }
        for (rank, event) in events.iter().enumerate() {
            event.write_to(reading, rank + 1);
        }
        events.len()
    }

    /// Warm up and apply, for digital readings only.
    pub async fn process(&self, reading: &mut Reading) -> usize {
        if reading.kind() != Some(MessageKind::Digital) {
            return 0;
        }
        self.warm_up(&reading.asset).await;
        self.apply(reading)
    }
}

impl Reconfigurable for DigitalEventGenerator {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    fn reconfigure(&self, json: &str) -> Result<()> {
        self.slot.replace_with(json, DigitalConfig::from_value)
    }

    fn active_config(&self) -> Value {
        self.slot.document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pqgate_core::{LatestReadingSource, MemoryReadingSource};

    const FEEDER_CONFIG: &str = r#"{
        "DIGITAL_CHANNELS": [
            {"Channel": 1, "Field": "Digi1"}, {"Channel": 2, "Field": "Digi2"},
            {"Channel": 3, "Field": "Digi3"}, {"Channel": 4, "Field": "Digi4"},
            {"Channel": 5, "Field": "Digi5"}, {"Channel": 6, "Field": "Digi6"}
        ],
        "DIGITAL_CHANNEL_NAME": [
            {"Digi1": "CB"}, {"Digi2": "CB"}, {"Digi3": "OC"},
            {"Digi4": "EF"}, {"Digi5": null}, {"Digi6": null}
        ],
        "DIGITAL_CHANNEL_TYPE": [
            {"Digi1": "DP1"}, {"Digi2": "DP1"}, {"Digi3": "SP1"},
            {"Digi4": null}, {"Digi5": "SP1"}, {"Digi6": null}
        ],
        "DIGITAL_CHANNEL_STATE": [
            {"DP1": [{"0": "INVALID"}, {"1": "OPEN"}, {"2": "CLOSE"}, {"3": "INTERMEDIATE"}]},
            {"SP1": [{"0": "OPEN"}, {"1": "CLOSE"}]}
        ]
    }"#;

    fn dds(asset: &str, bits: [u8; 6]) -> Reading {
        let mut r = Reading::new(asset, "2025-02-07 12:51:34", format!("{}/ddstop", asset));
        for (i, b) in bits.iter().enumerate() {
            r.add(channel_id(i as u32 + 1), *b);
        }
        r.add("IsNlf", false);
        r
    }

    fn generator() -> DigitalEventGenerator {
        let source: DynLatestReadingSource = Arc::new(MemoryReadingSource::new());
        let stage = DigitalEventGenerator::new(source, Duration::from_secs(1));
        stage.reconfigure(FEEDER_CONFIG).unwrap();
        stage
    }

    #[test]
    fn test_config_compiles() {
        let stage = generator();
        let config = stage.config();
        let ids: Vec<_> = config.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["Digi1", "Digi3", "Digi4"]);
        assert_eq!(config.channels[0].partner.as_deref(), Some("Digi2"));
        // Null type defaults to SinglePoint.
        assert_eq!(config.channels[2].point, PointType::SinglePoint);
        assert_eq!(config.label(PointType::DoublePoint, 3), "INTERMEDIATE");
        assert_eq!(config.label(PointType::SinglePoint, 7), UNKNOWN_STATE);
    }

    #[tokio::test]
    async fn test_single_point_change() {
        let stage = generator();
        let mut first = dds("STMS1", [0, 0, 0, 0, 0, 0]);
        assert_eq!(stage.process(&mut first).await, 0);

        let mut second = dds("STMS1", [0, 0, 1, 0, 0, 0]);
        assert_eq!(stage.process(&mut second).await, 1);
        assert_eq!(second.get("name1"), Some(&FieldValue::String("OC".into())));
        assert_eq!(second.get("channel1"), Some(&FieldValue::String("Digi3".into())));
        assert_eq!(second.get("di_value1"), Some(&FieldValue::Integer(1)));
        assert_eq!(second.get("state1"), Some(&FieldValue::String("CLOSE".into())));
        assert_eq!(second.get("bits1"), Some(&FieldValue::Integer(1)));

        let mut third = dds("STMS1", [0, 0, 1, 0, 0, 0]);
        assert_eq!(stage.process(&mut third).await, 0);
        assert!(third.get("name1").is_none());
    }

    #[tokio::test]
    async fn test_double_point_combines_pair() {
        let stage = generator();
        for (b0, b1) in [(0u8, 0u8), (1, 0), (0, 1), (1, 1)] {
            let mut r = dds("STMS1", [b0, b1, 0, 0, 0, 0]);
            stage.process(&mut r).await;
            let expected = b0 as i64 + 2 * b1 as i64;
            if expected != 0 {
                assert_eq!(r.get("channel1"), Some(&FieldValue::String("Digi1".into())));
                assert_eq!(r.get("di_value1"), Some(&FieldValue::Integer(expected)));
                assert_eq!(r.get("bits1"), Some(&FieldValue::Integer(2)));
                // Digi2 is consumed by the pair.
                assert!(r.get("name2").is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_events_are_ranked() {
        let stage = generator();
        let mut first = dds("STMS1", [0, 0, 0, 0, 0, 0]);
        stage.process(&mut first).await;

        let mut r = dds("STMS1", [0, 1, 0, 1, 1, 0]);
        assert_eq!(stage.process(&mut r).await, 2);
        assert_eq!(r.get("channel1"), Some(&FieldValue::String("Digi1".into())));
        assert_eq!(r.get("state1"), Some(&FieldValue::String("CLOSE".into())));
        assert_eq!(r.get("channel2"), Some(&FieldValue::String("Digi4".into())));
        assert!(r.get("channel3").is_none());
    }

    #[tokio::test]
    async fn test_cold_start_uses_zero_baseline() {
        let stage = generator();
        let mut r = dds("STMS1", [1, 0, 1, 0, 0, 0]);
        assert_eq!(stage.process(&mut r).await, 2);
        assert!(stage.is_warm("STMS1"));
    }

    #[tokio::test]
    async fn test_warm_up_from_stored_reading() {
        let source = MemoryReadingSource::new();
        let mut stored = Fields::new();
        stored.insert("Digi3".into(), 1i64.into());
        stored.insert("timestamp".into(), "2025-02-07 12:51:33".into());
        source.set("STMS1", stored);

        let stage = DigitalEventGenerator::new(Arc::new(source), Duration::from_secs(1));
        stage.reconfigure(FEEDER_CONFIG).unwrap();

        let mut r = dds("STMS1", [0, 0, 1, 0, 0, 0]);
        assert_eq!(stage.process(&mut r).await, 0);
    }

    struct FailingSource;

    #[async_trait]
    impl LatestReadingSource for FailingSource {
        async fn latest(&self, _asset: &str) -> pqgate_core::Result<Option<Fields>> {
            Err(pqgate_core::Error::Network("connection refused".into()))
        }
    }

    struct StalledSource;

    #[async_trait]
    impl LatestReadingSource for StalledSource {
        async fn latest(&self, _asset: &str) -> pqgate_core::Result<Option<Fields>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_is_empty_baseline() {
        let stage = DigitalEventGenerator::new(Arc::new(FailingSource), Duration::from_secs(1));
        stage.reconfigure(FEEDER_CONFIG).unwrap();
        stage.warm_up("STMS1").await;
        assert_eq!(stage.previous("STMS1"), Some(HashMap::new()));

        let stage = DigitalEventGenerator::new(Arc::new(StalledSource), Duration::from_millis(20));
        stage.reconfigure(FEEDER_CONFIG).unwrap();
        let mut r = dds("STMS2", [0, 0, 1, 0, 0, 0]);
        assert_eq!(stage.process(&mut r).await, 1);
    }

    #[tokio::test]
    async fn test_cache_is_per_asset_and_overwritten() {
        let stage = generator();
        let mut a = dds("A", [0, 0, 1, 0, 0, 0]);
        stage.process(&mut a).await;
        let mut b = dds("B", [0, 0, 0, 0, 0, 0]);
        assert_eq!(stage.process(&mut b).await, 0);

        let cached = stage.previous("A").unwrap();
        assert_eq!(cached.get("Digi3"), Some(&1));
        assert_eq!(cached.get("Digi4"), Some(&0));
        // Unnamed channels are never cached.
        assert!(!cached.contains_key("Digi5"));
    }

    #[tokio::test]
    async fn test_non_digital_readings_untouched() {
        let stage = generator();
        let mut r = Reading::new("STMS1", "t", "STMS1/adstop");
        r.add("Digi3", 1i64);
        assert_eq!(stage.process(&mut r).await, 0);
        assert!(!stage.is_warm("STMS1"));
    }

    #[test]
    fn test_rejects_unpaired_double_point() {
        let stage = generator();
        let bad = r#"{
            "DIGITAL_CHANNELS": [{"Channel": 1}],
            "DIGITAL_CHANNEL_NAME": [{"Digi1": "CB"}],
            "DIGITAL_CHANNEL_TYPE": [{"Digi1": "DP1"}],
            "DIGITAL_CHANNEL_STATE": []
        }"#;
        assert!(matches!(stage.reconfigure(bad), Err(FilterError::Validation { .. })));

        let bad_type = r#"{
            "DIGITAL_CHANNELS": [{"Channel": 1}],
            "DIGITAL_CHANNEL_NAME": [{"Digi1": "CB"}],
            "DIGITAL_CHANNEL_TYPE": [{"Digi1": "XX"}]
        }"#;
        assert!(stage.reconfigure(bad_type).is_err());
        assert_eq!(stage.config().channels.len(), 3);
    }

    #[test]
    fn test_rejects_double_point_on_last_channel_number() {
        let stage = generator();
        let last = u32::MAX;
        let bad = format!(
            r#"{{
            "DIGITAL_CHANNELS": [{{"Channel": {last}}}],
            "DIGITAL_CHANNEL_NAME": [{{"Digi{last}": "CB"}}],
            "DIGITAL_CHANNEL_TYPE": [{{"Digi{last}": "DP1"}}]
        }}"#
        );
        assert!(matches!(stage.reconfigure(&bad), Err(FilterError::Validation { .. })));
        assert_eq!(stage.config().channels.len(), 3);
    }
}
