//! Limit violation evaluation.
//!
//! Every numeric field that has configured bounds is classified as
//! `UPPER`, `LOWER` or `NORMAL` and summarised in a group of companion
//! fields `ParameterK`, `LimitViolationK`, `ValueK` and `LimitK`.

use indexmap::IndexMap;
use pqgate_core::{FieldValue, Reading};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{FilterError, Result};
use crate::stage::{ConfigSlot, Reconfigurable};

const STAGE: &str = "limits";

/// Default number of parameters classified per reading.
pub const DEFAULT_MAX_VIOLATIONS: usize = 10;

/// Classification of one parameter against its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Upper,
    Lower,
    Normal,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upper => "UPPER",
            Self::Lower => "LOWER",
            Self::Normal => "NORMAL",
        }
    }
}

/// Lower and upper bound of a parameter, kept as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: FieldValue,
    pub upper: FieldValue,
}

impl Bounds {
    pub fn new(lower: impl Into<FieldValue>, upper: impl Into<FieldValue>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Classify `value` and return the exceeded bound, if any.
    pub fn classify(&self, value: f64) -> (Violation, Option<&FieldValue>) {
        let upper = self.upper.as_f64().unwrap_or(f64::INFINITY);
        let lower = self.lower.as_f64().unwrap_or(f64::NEG_INFINITY);
        if value > upper {
            (Violation::Upper, Some(&self.upper))
        } else if value < lower {
            (Violation::Lower, Some(&self.lower))
        } else {
            (Violation::Normal, None)
        }
    }
}

/// Compiled limit configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitTable {
    pub bounds: IndexMap<String, Bounds>,
    pub max_violations: usize,
    pub topic_filter: Option<String>,
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            bounds: IndexMap::new(),
            max_violations: DEFAULT_MAX_VIOLATIONS,
            topic_filter: None,
        }
    }
}

#[derive(Deserialize)]
struct RawLimitConfig {
    #[serde(rename = "PARAMETERS", default)]
    parameters: Vec<IndexMap<String, Vec<Map<String, Value>>>>,

    #[serde(rename = "MAX_LIMIT_VIOLATION", default = "default_max")]
    max_violations: usize,

    #[serde(rename = "TOPIC_FILTER", default)]
    topic_filter: Option<String>,
}

fn default_max() -> usize {
    DEFAULT_MAX_VIOLATIONS
}

fn bound(param: &str, entries: &[Map<String, Value>], key: &str) -> Result<FieldValue> {
    let value = entries
        .iter()
        .find_map(|entry| entry.get(key))
        .ok_or_else(|| FilterError::validation(STAGE, format!("{} has no {}", param, key)))?;
    match value {
        Value::Number(n) => Ok(n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Float))
            .unwrap_or(FieldValue::Null)),
        other => Err(FilterError::validation(
            STAGE,
            format!("{} of {} must be a number, got {}", key, param, other),
        )),
    }
}

impl LimitTable {
    pub fn with_bounds(mut self, name: impl Into<String>, bounds: Bounds) -> Self {
        self.bounds.insert(name.into(), bounds);
        self
    }

    pub fn with_max_violations(mut self, max: usize) -> Self {
        self.max_violations = max;
        self
    }

    pub fn with_topic_filter(mut self, filter: impl Into<String>) -> Self {
        self.topic_filter = Some(filter.into());
        self
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let raw: RawLimitConfig =
            serde_json::from_value(value.clone()).map_err(|e| FilterError::parse(STAGE, e))?;

        let mut bounds = IndexMap::new();
        for item in &raw.parameters {
            for (param, entries) in item {
                let lower = bound(param, entries, "LOWER_LIMIT")?;
                let upper = bound(param, entries, "UPPER_LIMIT")?;
                bounds.insert(param.clone(), Bounds { lower, upper });
            }
        }

        Ok(Self {
            bounds,
            max_violations: raw.max_violations,
            topic_filter: raw.topic_filter.filter(|f| !f.is_empty()),
        })
    }

    fn applies_to(&self, topic: &str) -> bool {
        self.topic_filter
            .as_deref()
            .map_or(true, |filter| topic.contains(filter))
    }

    /// Append violation groups to `reading`. Returns the number of
    /// parameters classified.
    pub fn evaluate(&self, reading: &mut Reading) -> usize {
        if self.bounds.is_empty() || !self.applies_to(&reading.topic) {
            return 0;
        }

        let mut additions: Vec<(String, FieldValue)> = Vec::new();
        let mut index = 0;
        for (name, value) in &reading.fields {
            if index >= self.max_violations {
                break;
            }
            let Some(bounds) = self.bounds.get(name) else {
                continue;
            };
            let Some(number) = value.as_f64() else {
                continue;
            };

            index += 1;
            let (status, exceeded) = bounds.classify(number);
            additions.push((format!("Parameter{}", index), name.as_str().into()));
            additions.push((format!("LimitViolation{}", index), status.as_str().into()));
            additions.push((format!("Value{}", index), value.clone()));
            if let Some(limit) = exceeded {
                additions.push((format!("Limit{}", index), limit.clone()));
            }
        }

        for (key, value) in additions {
            reading.add(key, value);
        }
        index
    }
}

/// The limit evaluator stage.
pub struct LimitEvaluator {
    slot: ConfigSlot<LimitTable>,
}

impl Default for LimitEvaluator {
    fn default() -> Self {
        Self::new(LimitTable::default())
    }
}

impl LimitEvaluator {
    pub fn new(table: LimitTable) -> Self {
        Self {
            slot: ConfigSlot::new(STAGE, table, Value::Object(Map::new())),
        }
    }

    pub fn table(&self) -> LimitTable {
        (*self.slot.current()).clone()
    }

    pub fn apply(&self, reading: &mut Reading) -> usize {
        self.slot.current().evaluate(reading)
    }
}

impl Reconfigurable for LimitEvaluator {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    fn reconfigure(&self, json: &str) -> Result<()> {
        self.slot.replace_with(json, LimitTable::from_value)
    }

    fn active_config(&self) -> Value {
        self.slot.document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(fields: &[(&str, f64)]) -> Reading {
        let mut r = Reading::new("STMS1", "2024-06-15 09:15:30", "STMS1/pqstop");
        for (k, v) in fields {
            r.add(*k, *v);
        }
        r
    }

    #[test]
    fn test_upper_violation() {
        let table = LimitTable::default().with_bounds("Current1", Bounds::new(-1i64, 120i64));
        let mut r = Reading::new("STMS1", "t", "STMS1/pqstop");
        r.add("Current1", 150i64);

        assert_eq!(table.evaluate(&mut r), 1);
        assert_eq!(r.get("Parameter1"), Some(&FieldValue::String("Current1".into())));
        assert_eq!(r.get("LimitViolation1"), Some(&FieldValue::String("UPPER".into())));
        assert_eq!(r.get("Value1"), Some(&FieldValue::Integer(150)));
        assert_eq!(r.get("Limit1"), Some(&FieldValue::Integer(120)));
    }

    #[test]
    fn test_lower_and_normal() {
        let table = LimitTable::default()
            .with_bounds("A", Bounds::new(10.0, 20.0))
            .with_bounds("B", Bounds::new(10.0, 20.0));
        let mut r = reading(&[("B", 15.0), ("X", 1.0), ("A", 5.0)]);

        assert_eq!(table.evaluate(&mut r), 2);
        // Field order decides K, not table order.
        assert_eq!(r.get("Parameter1"), Some(&FieldValue::String("B".into())));
        assert_eq!(r.get("LimitViolation1"), Some(&FieldValue::String("NORMAL".into())));
        assert!(r.get("Limit1").is_none());
        assert_eq!(r.get("Parameter2"), Some(&FieldValue::String("A".into())));
        assert_eq!(r.get("LimitViolation2"), Some(&FieldValue::String("LOWER".into())));
        assert_eq!(r.get("Limit2"), Some(&FieldValue::Float(10.0)));
    }

    #[test]
    fn test_cap_drops_the_rest() {
        let mut table = LimitTable::default().with_max_violations(3);
        let mut fields = Vec::new();
        for i in 0..6 {
            let name = format!("P{}", i);
            table = table.with_bounds(name.clone(), Bounds::new(0.0, 1.0));
            fields.push(name);
        }
        let mut r = Reading::new("STMS1", "t", "STMS1/pqstop");
        for name in &fields {
            r.add(name.clone(), 99.0);
        }

        assert_eq!(table.evaluate(&mut r), 3);
        assert!(r.get("Parameter3").is_some());
        assert!(r.get("Parameter4").is_none());
        assert_eq!(r.fields.len(), 6 + 3 * 4);
    }

    #[test]
    fn test_existing_fields_keep_order() {
        let table = LimitTable::default().with_bounds("B", Bounds::new(0.0, 1.0));
        let mut r = reading(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        table.evaluate(&mut r);
        let keys: Vec<_> = r.fields.keys().map(String::as_str).collect();
        assert_eq!(&keys[..3], &["A", "B", "C"]);
    }

    #[test]
    fn test_topic_filter() {
        let table = LimitTable::default()
            .with_bounds("A", Bounds::new(0.0, 1.0))
            .with_topic_filter("pqstop");
        let mut r = reading(&[("A", 5.0)]);
        r.topic = "STMS1/pdstop".into();
        assert_eq!(table.evaluate(&mut r), 0);
        assert_eq!(r.fields.len(), 1);
    }

    #[test]
    fn test_non_numeric_fields_are_skipped() {
        let table = LimitTable::default().with_bounds("IsNlf", Bounds::new(0i64, 0i64));
        let mut r = Reading::new("STMS1", "t", "STMS1/pqstop");
        r.add("IsNlf", true);
        assert_eq!(table.evaluate(&mut r), 0);
    }

    #[test]
    fn test_reconfigure_from_json() {
        let stage = LimitEvaluator::default();
        stage
            .reconfigure(
                r#"{"PARAMETERS": [
                    {"MinVtg_R": [{"LOWER_LIMIT": 80}, {"UPPER_LIMIT": 120}]},
                    {"MaxVtg_R": [{"LOWER_LIMIT": 100.5}, {"UPPER_LIMIT": 200}]}
                ], "MAX_LIMIT_VIOLATION": 4, "TOPIC_FILTER": "pqstop"}"#,
            )
            .unwrap();

        let table = stage.table();
        assert_eq!(table.max_violations, 4);
        assert_eq!(table.topic_filter.as_deref(), Some("pqstop"));
        assert_eq!(table.bounds["MinVtg_R"], Bounds::new(80i64, 120i64));
        assert_eq!(table.bounds["MaxVtg_R"].lower, FieldValue::Float(100.5));

        let mut r = reading(&[("MinVtg_R", 70.0)]);
        assert_eq!(stage.apply(&mut r), 1);
        assert_eq!(r.get("Limit1"), Some(&FieldValue::Integer(80)));
    }

    #[test]
    fn test_bad_config_keeps_previous() {
        let stage = LimitEvaluator::default();
        stage
            .reconfigure(r#"{"PARAMETERS": [{"A": [{"LOWER_LIMIT": 0}, {"UPPER_LIMIT": 1}]}]}"#)
            .unwrap();

        let missing_upper = r#"{"PARAMETERS": [{"A": [{"LOWER_LIMIT": 0}]}]}"#;
        assert!(matches!(
            stage.reconfigure(missing_upper),
            Err(FilterError::Validation { .. })
        ));
        assert!(stage.reconfigure(r#"{"PARAMETERS": 3}"#).is_err());
        assert!(stage.table().bounds.contains_key("A"));
    }
}
