//! Reading model.
//!
//! A [`Reading`] is one decoded frame: the asset it belongs to, the frame
//! timestamp, the topic it arrived on, and an insertion-ordered map of
//! named values. Filters only ever add fields; they never remove or
//! reorder what an earlier stage wrote.

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Result;
use crate::topic::{topic_category, MessageKind};

/// Field name carrying the payload bytes of an undecodable frame.
pub const RAW_FIELD: &str = "binary_data";

/// Canonical timestamp format for readings.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered field map of a reading.
pub type Fields = IndexMap<String, FieldValue>;

/// A single field value.
///
/// Variant order matters for untagged deserialization: integers must be
/// tried before floats so that `150` stays an integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Raw payload bytes, serialized as an array of numbers.
    Bytes(Vec<u8>),
    Null,
}

impl FieldValue {
    /// Numeric view of the value. Booleans are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value, accepting booleans and whole floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Boolean(v) => Some(i64::from(*v)),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Float(_) | Self::Integer(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One decoded (or raw) frame on its way through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub asset: String,
    pub timestamp: String,
    pub topic: String,
    pub fields: Fields,
}

impl Reading {
    pub fn new(
        asset: impl Into<String>,
        timestamp: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            asset: asset.into(),
            timestamp: timestamp.into(),
            topic: topic.into(),
            fields: Fields::new(),
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Raw fallback reading for a payload that could not be decoded.
    pub fn raw(
        asset: impl Into<String>,
        timestamp: impl Into<String>,
        topic: impl Into<String>,
        payload: &[u8],
    ) -> Self {
        let mut reading = Self::new(asset, timestamp, topic);
        reading.add(RAW_FIELD, payload.to_vec());
        reading
    }

    /// Build a reading from a flat map that carries `timestamp` and `topic`
    /// among its entries, as published by upstream peers.
    ///
    /// Returns `None` when either key is missing or not a string.
    pub fn from_flat(asset: impl Into<String>, mut flat: Fields) -> Option<Self> {
        let timestamp = match flat.shift_remove("timestamp")? {
            FieldValue::String(s) => s,
            _ => return None,
        };
        let topic = match flat.shift_remove("topic")? {
            FieldValue::String(s) => s,
            _ => return None,
        };
        Some(Self {
            asset: asset.into(),
            timestamp,
            topic,
            fields: flat,
        })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Add a field. An existing key keeps its position and takes the new value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Whether this reading is the raw fallback of an undecodable frame.
    pub fn is_raw(&self) -> bool {
        matches!(self.fields.get(RAW_FIELD), Some(FieldValue::Bytes(_)))
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_topic(&self.topic)
    }

    pub fn topic_category(&self) -> Option<&str> {
        topic_category(&self.topic)
    }

    /// Borrowed view that serializes as the canonical flat object.
    pub fn canonical(&self) -> CanonicalReading<'_> {
        CanonicalReading(self)
    }

    /// Canonical JSON text: `timestamp` and `topic` first, then every field
    /// in insertion order.
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.canonical())?)
    }
}

/// Flat serialization of a [`Reading`] without its asset.
pub struct CanonicalReading<'a>(&'a Reading);

impl Serialize for CanonicalReading<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let reading = self.0;
        let extra = reading
            .fields
            .keys()
            .filter(|k| *k != "timestamp" && *k != "topic")
            .count();
        let mut map = serializer.serialize_map(Some(extra + 2))?;
        map.serialize_entry("timestamp", &reading.timestamp)?;
        map.serialize_entry("topic", &reading.topic)?;
        for (name, value) in &reading.fields {
            if name == "timestamp" || name == "topic" {
                continue;
            }
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Current UTC time in the canonical timestamp format.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}
