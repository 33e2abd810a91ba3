//! Inbound payload classification and DP value translation.

use crate::catalog::{ActiveMapping, MappingCandidate};
use crate::error::Result;
use crate::protocol::{DpType, FrameCodec, is_truthy, number_of};
use crate::stats::Counters;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const DP_KEYS: &[&str] = &["dp", "dpId", "dp_id", "datapoint"];
const VALUE_KEYS: &[&str] = &["value", "data", "dpValue"];

const BATTERY_CAPABILITY: &str = "measure_battery";
const BATTERY_ALARM_CAPABILITY: &str = "alarm_battery";

/// Battery percentage at or below which `alarm_battery` is raised.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// A data point report before translation.
#[derive(Debug, Clone, PartialEq)]
pub struct DpReport {
    /// `None` when the DP field is present but not a usable 0..=255 index
    pub dp: Option<u8>,
    pub raw: Value,
}

/// Origin of an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Proprietary(DpReport),
    /// Passed unchanged to the native pipeline
    Native(Value),
}

/// A value ready for the capability host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    pub capability: String,
    pub value: Value,
}

pub struct InboundClassifier {
    device_id: String,
    mapping: Arc<ActiveMapping>,
    codec: Arc<dyn FrameCodec>,
    counters: Arc<Counters>,
    low_battery_threshold: f64,
}

impl InboundClassifier {
    pub(crate) fn new(
        device_id: &str,
        mapping: Arc<ActiveMapping>,
        codec: Arc<dyn FrameCodec>,
        counters: Arc<Counters>,
        low_battery_threshold: f64,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            mapping,
            codec,
            counters,
            low_battery_threshold,
        }
    }

    /// Decides whether a payload is a DP report.
    ///
    /// Any object carrying one of the recognized DP keys is a DP report, whatever
    /// the key holds. The index comes from the first key that holds a usable one.
    pub fn classify(payload: &Value) -> Inbound {
        let Some(obj) = payload.as_object() else {
            return Inbound::Native(payload.clone());
        };

        if !DP_KEYS.iter().any(|key| obj.contains_key(*key)) {
            return Inbound::Native(payload.clone());
        }

        let dp = DP_KEYS
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(dp_index);
        let raw = VALUE_KEYS
            .iter()
            .find_map(|key| obj.get(*key))
            .cloned()
            .unwrap_or(Value::Null);
        Inbound::Proprietary(DpReport { dp, raw })
    }

    /// Decodes a binary tunnel frame into one report per data point.
    pub fn classify_frame(&self, data: &[u8]) -> Result<Vec<DpReport>> {
        let frame = self.codec.decode(data).inspect_err(|e| {
            Counters::bump(&self.counters.codec_errors);
            warn!(
                "Device {}: dropping undecodable frame {}: {}",
                self.device_id,
                hex::encode(data),
                e
            );
        })?;
        debug!(
            "Device {}: frame seq {} with {} DPs",
            self.device_id,
            frame.seq,
            frame.dps.len()
        );
        Ok(frame
            .dps
            .into_iter()
            .map(|dp| DpReport {
                dp: Some(dp.index),
                raw: dp.value.to_json(),
            })
            .collect())
    }

    /// Translates a report into capability updates, one per matching mapping entry.
    ///
    /// Unmapped DPs and unusable indices yield nothing. A battery percentage also
    /// drives `alarm_battery` when the device has it.
    pub fn translate(&self, report: &DpReport) -> Vec<CapabilityUpdate> {
        Counters::bump(&self.counters.proprietary_reports);
        let Some(dp) = report.dp else {
            Counters::bump(&self.counters.dropped_reports);
            debug!(
                "Device {}: unusable DP index (value {}), dropped",
                self.device_id, report.raw
            );
            return Vec::new();
        };

        let mut updates: Vec<CapabilityUpdate> = self
            .mapping
            .for_dp(dp)
            .map(|entry| CapabilityUpdate {
                capability: entry.capability.to_string(),
                value: to_capability_value(entry, &report.raw),
            })
            .collect();

        if updates.is_empty() {
            Counters::bump(&self.counters.dropped_reports);
            debug!(
                "Device {}: no mapping for DP {} (value {}), dropped",
                self.device_id, dp, report.raw
            );
            return updates;
        }

        if let Some(alarm) = self.battery_alarm(&updates) {
            updates.push(alarm);
        }
        for update in &updates {
            debug!(
                "Device {}: DP {} -> {} = {}",
                self.device_id, dp, update.capability, update.value
            );
        }
        updates
    }

    fn battery_alarm(&self, updates: &[CapabilityUpdate]) -> Option<CapabilityUpdate> {
        if !self.mapping.has_capability(BATTERY_ALARM_CAPABILITY) {
            return None;
        }
        let level = updates
            .iter()
            .find(|u| u.capability == BATTERY_CAPABILITY)
            .and_then(|u| u.value.as_f64())?;
        let low = level <= self.low_battery_threshold;
        if low {
            info!("Device {}: low battery ({}%)", self.device_id, level);
        }
        Some(CapabilityUpdate {
            capability: BATTERY_ALARM_CAPABILITY.to_string(),
            value: Value::Bool(low),
        })
    }
}

/// Integral, in-range DP index from a number (integral floats included) or a numeric string.
fn dp_index(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.fract() != 0.0 || !(0.0..=255.0).contains(&n) {
        return None;
    }
    Some(n as u8)
}

/// Inverse of the outward conversion: `raw / scale` for numbers, truthiness for booleans.
fn to_capability_value(entry: &MappingCandidate, raw: &Value) -> Value {
    match entry.value_type {
        DpType::Bool => Value::Bool(is_truthy(raw)),
        DpType::Number => match (number_of(raw), entry.scale) {
            (Some(n), Some(scale)) if scale != 0.0 => Value::from(n / scale),
            (Some(n), _) if !raw.is_number() => Value::from(n),
            _ => raw.clone(),
        },
        DpType::String => match raw {
            Value::String(_) => raw.clone(),
            Value::Null => Value::String(String::new()),
            other => Value::String(other.to_string()),
        },
        DpType::Enum | DpType::Bitmap | DpType::Raw => raw.clone(),
    }
}
