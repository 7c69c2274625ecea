//! Analog channel calibration.
//!
//! Scales the raw analog channels of an ADS frame into engineering values
//! and looks the tap position up in a bracketed table. Raw channels are
//! kept; each output is only added when its source channel is present.

use pqgate_core::{FieldValue, Reading};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FilterError, Result};
use crate::stage::{ConfigSlot, Reconfigurable};

const STAGE: &str = "calibration";

pub const BATTERY_VOLTAGE_CHANNEL: &str = "ANASEN_CH1";
pub const BATTERY_CURRENT_CHANNEL: &str = "ANASEN_CH2";
pub const AMBIENT_CHANNEL: &str = "ANASEN_CH3";
pub const TAP_CHANNEL: &str = "ANASEN_CH4";

/// One entry of the tap table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapPosition {
    /// Measured channel value for this tap
    #[serde(rename = "VALUE")]
    pub value: f64,
    /// Tap label written to the reading
    #[serde(rename = "TAP")]
    pub tap: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(rename = "VDC_MULT_FACTOR", default)]
    pub voltage_mult: f64,

    #[serde(rename = "ADC_DIV_FACTOR", default = "unit")]
    pub current_div: f64,

    #[serde(rename = "AMBIENT_MULT_FACTOR", default)]
    pub ambient_mult: f64,

    #[serde(rename = "AMBIENT_DIV_FACTOR", default = "unit")]
    pub ambient_div: f64,

    #[serde(rename = "TAP_TOLERANCE", default)]
    pub tap_tolerance: f64,

    #[serde(rename = "TAP_POSITIONS", default)]
    pub tap_table: Vec<TapPosition>,
}

fn unit() -> f64 {
    1.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            voltage_mult: 0.0,
            current_div: 1.0,
            ambient_mult: 0.0,
            ambient_div: 1.0,
            tap_tolerance: 0.0,
            tap_table: Vec::new(),
        }
    }
}

impl CalibrationConfig {
    pub fn from_value(value: &Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value.clone()).map_err(|e| FilterError::parse(STAGE, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.current_div == 0.0 {
            return Err(FilterError::validation(STAGE, "ADC_DIV_FACTOR must not be zero"));
        }
        if self.ambient_div == 0.0 {
            return Err(FilterError::validation(STAGE, "AMBIENT_DIV_FACTOR must not be zero"));
        }
        if self.tap_tolerance < 0.0 {
            return Err(FilterError::validation(STAGE, "TAP_TOLERANCE must not be negative"));
        }
        Ok(())
    }

    /// First tap whose value lies in `(raw - tolerance, raw + tolerance]`.
    pub fn tap_for(&self, raw: f64) -> Option<&FieldValue> {
        let low = raw - self.tap_tolerance;
        let high = raw + self.tap_tolerance;
        self.tap_table
            .iter()
            .find(|t| t.value > low && t.value <= high)
            .map(|t| &t.tap)
    }
}

/// Round half away from zero to two decimals.
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// The calibration stage.
pub struct Calibration {
    slot: ConfigSlot<CalibrationConfig>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibration {
    pub fn new() -> Self {
        let config = CalibrationConfig::default();
        let document = serde_json::to_value(&config).unwrap_or(Value::Null);
        Self {
            slot: ConfigSlot::new(STAGE, config, document),
        }
    }

    pub fn config(&self) -> CalibrationConfig {
        (*self.slot.current()).clone()
    }

    /// Add calibrated values to a reading.
    pub fn apply(&self, reading: &mut Reading) {
        let config = self.slot.current();
        let channel = |name: &str| reading.get(name).and_then(FieldValue::as_f64);

        let voltage = channel(BATTERY_VOLTAGE_CHANNEL);
        let current = channel(BATTERY_CURRENT_CHANNEL);
        let ambient = channel(AMBIENT_CHANNEL);
        let tap = channel(TAP_CHANNEL);

        if let Some(raw) = voltage {
            reading.add("battery_voltage", raw * config.voltage_mult);
        }
        if let Some(raw) = current {
            reading.add("battery_current", round2(raw / config.current_div));
        }
        if let Some(raw) = ambient {
            reading.add(
                "ambient_temperature",
                round2(raw * config.ambient_mult / config.ambient_div),
            );
        }
        if let Some(raw) = tap {
            let position = config.tap_for(raw).cloned().unwrap_or(FieldValue::Null);
            reading.add("tap_position", position);
        }
    }
}

impl Reconfigurable for Calibration {
    fn stage_name(&self) -> &'static str {
        STAGE
    }

    fn reconfigure(&self, json: &str) -> Result<()> {
        self.slot.replace_with(json, CalibrationConfig::from_value)
    }

    fn active_config(&self) -> Value {
        self.slot.document()
    }
}
