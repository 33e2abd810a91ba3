//! Static DP catalog and the per-device active mapping built from it.
//!
//! The catalog lists every known `(dp, capability)` pairing across device families.
//! The same DP index means different things on different devices (DP 1 is a relay
//! on a switch but a temperature on a sensor); the device's declared capabilities
//! decide which candidates become active.

use crate::cluster::ProtocolMode;
use crate::protocol::DpType;
use serde::Serialize;
use std::collections::HashMap;

/// One catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappingCandidate {
    pub dp: u8,
    pub capability: &'static str,
    pub value_type: DpType,
    /// Divisor between the wire integer and the capability value.
    pub scale: Option<f64>,
    pub description: &'static str,
}

impl MappingCandidate {
    pub const fn new(
        dp: u8,
        capability: &'static str,
        value_type: DpType,
        description: &'static str,
    ) -> Self {
        Self {
            dp,
            capability,
            value_type,
            scale: None,
            description,
        }
    }

    pub const fn scaled(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }
}

const fn bool_dp(
    dp: u8,
    capability: &'static str,
    description: &'static str,
) -> MappingCandidate {
    MappingCandidate::new(dp, capability, DpType::Bool, description)
}

const fn number_dp(
    dp: u8,
    capability: &'static str,
    description: &'static str,
) -> MappingCandidate {
    MappingCandidate::new(dp, capability, DpType::Number, description)
}

/// Built-in catalog, in declaration order.
pub static CATALOG: &[MappingCandidate] = &[
    bool_dp(1, "onoff", "Main switch"),
    number_dp(1, "measure_temperature", "Temperature").scaled(10.0),
    bool_dp(1, "alarm_motion", "Motion / presence"),
    bool_dp(1, "alarm_contact", "Contact sensor"),
    bool_dp(1, "alarm_water", "Water leak"),
    bool_dp(2, "onoff.1", "Switch gang 2"),
    number_dp(2, "measure_humidity", "Humidity"),
    number_dp(2, "dim", "Brightness").scaled(1000.0),
    number_dp(2, "target_temperature", "Target temperature").scaled(10.0),
    number_dp(2, "windowcoverings_set", "Cover position").scaled(100.0),
    bool_dp(3, "onoff.2", "Switch gang 3"),
    bool_dp(4, "onoff.3", "Switch gang 4"),
    number_dp(4, "measure_battery", "Battery percentage"),
    bool_dp(13, "locked", "Child lock"),
    bool_dp(14, "alarm_battery", "Low battery"),
    number_dp(15, "measure_battery", "Battery percentage"),
    number_dp(17, "meter_power", "Energy (kWh)").scaled(100.0),
    number_dp(18, "measure_current", "Current (A)").scaled(1000.0),
    number_dp(19, "measure_power", "Power (W)").scaled(10.0),
    number_dp(20, "measure_voltage", "Voltage (V)").scaled(10.0),
    number_dp(104, "measure_luminance", "Illuminance"),
];

/// The catalog subset that applies to one device. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ActiveMapping {
    entries: Vec<MappingCandidate>,
    by_dp: HashMap<u8, Vec<usize>>,
    by_capability: HashMap<&'static str, usize>,
}

impl ActiveMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keeps every candidate whose capability the device declares.
    ///
    /// Pure ZCL devices never get DP entries. When two kept candidates claim the
    /// same DP both stay; inbound reports fan out to each of them.
    pub fn build<F>(mode: ProtocolMode, catalog: &[MappingCandidate], has_capability: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        if !mode.uses_tunnel() {
            return Self::empty();
        }

        let mut mapping = Self::empty();
        for candidate in catalog.iter().filter(|c| has_capability(c.capability)) {
            let idx = mapping.entries.len();
            mapping.entries.push(*candidate);
            mapping.by_dp.entry(candidate.dp).or_default().push(idx);
            mapping.by_capability.entry(candidate.capability).or_insert(idx);
        }
        mapping
    }

    /// Entries for an inbound DP, in declaration order.
    pub fn for_dp(&self, dp: u8) -> impl Iterator<Item = &MappingCandidate> + '_ {
        self.by_dp
            .get(&dp)
            .into_iter()
            .flatten()
            .map(move |&i| &self.entries[i])
    }

    /// The entry used for outward writes: the first declared one for the capability.
    pub fn for_capability(&self, capability: &str) -> Option<&MappingCandidate> {
        self.by_capability
            .get(capability)
            .map(|&i| &self.entries[i])
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.by_capability.contains_key(capability)
    }

    pub fn entries(&self) -> &[MappingCandidate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
