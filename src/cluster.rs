//! ZCL cluster identifiers, cluster name resolution and protocol mode detection.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use crate::protocol::TUNNEL_CLUSTER_ID;

/// Common ZCL cluster IDs
pub mod id {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const DOOR_LOCK: u16 = 0x0101;
    pub const WINDOW_COVERING: u16 = 0x0102;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const METERING: u16 = 0x0702;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
    pub const TUYA: u16 = super::TUNNEL_CLUSTER_ID;
}

/// Native clusters whose presence marks a device as ZCL capable.
pub const NATIVE_DETECTION_CLUSTERS: &[u16] = &[
    id::ON_OFF,
    id::LEVEL_CONTROL,
    id::COLOR_CONTROL,
    id::TEMPERATURE_MEASUREMENT,
    id::ILLUMINANCE_MEASUREMENT,
    id::OCCUPANCY_SENSING,
    id::IAS_ZONE,
];

// Every cluster name the adapter understands. Tunnel aliases all resolve to 0xEF00.
const CLUSTER_ALIASES: &[(&str, u16)] = &[
    ("tuya", id::TUYA),
    ("tuyaSpecific", id::TUYA),
    ("tuyaManufacturer", id::TUYA),
    ("manuSpecificTuya", id::TUYA),
    ("basic", id::BASIC),
    ("genBasic", id::BASIC),
    ("powerConfiguration", id::POWER_CONFIG),
    ("genPowerCfg", id::POWER_CONFIG),
    ("onOff", id::ON_OFF),
    ("genOnOff", id::ON_OFF),
    ("levelControl", id::LEVEL_CONTROL),
    ("genLevelCtrl", id::LEVEL_CONTROL),
    ("doorLock", id::DOOR_LOCK),
    ("closuresDoorLock", id::DOOR_LOCK),
    ("windowCovering", id::WINDOW_COVERING),
    ("closuresWindowCovering", id::WINDOW_COVERING),
    ("thermostat", id::THERMOSTAT),
    ("hvacThermostat", id::THERMOSTAT),
    ("colorControl", id::COLOR_CONTROL),
    ("lightingColorCtrl", id::COLOR_CONTROL),
    ("illuminanceMeasurement", id::ILLUMINANCE_MEASUREMENT),
    ("msIlluminanceMeasurement", id::ILLUMINANCE_MEASUREMENT),
    ("temperatureMeasurement", id::TEMPERATURE_MEASUREMENT),
    ("msTemperatureMeasurement", id::TEMPERATURE_MEASUREMENT),
    ("relativeHumidity", id::HUMIDITY_MEASUREMENT),
    ("msRelativeHumidity", id::HUMIDITY_MEASUREMENT),
    ("occupancySensing", id::OCCUPANCY_SENSING),
    ("msOccupancySensing", id::OCCUPANCY_SENSING),
    ("iasZone", id::IAS_ZONE),
    ("ssIasZone", id::IAS_ZONE),
    ("metering", id::METERING),
    ("seMetering", id::METERING),
    ("electricalMeasurement", id::ELECTRICAL_MEASUREMENT),
    ("haElectricalMeasurement", id::ELECTRICAL_MEASUREMENT),
];

/// Resolves a cluster name, decimal id or `0x` hex id to its numeric cluster id.
///
/// Names are matched case-insensitively against the alias table.
pub fn resolve_cluster(name: &str) -> Option<u16> {
    let name = name.trim();
    if let Some(&(_, cluster)) = CLUSTER_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
    {
        return Some(cluster);
    }

    match name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => name.parse::<u16>().ok(),
    }
}

/// The set of ZCL clusters exposed by a device endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSet {
    clusters: BTreeSet<u16>,
}

impl ClusterSet {
    /// Builds the set from cluster names. Unrecognized names are skipped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut clusters = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            match resolve_cluster(name) {
                Some(cluster) => {
                    clusters.insert(cluster);
                }
                None => debug!("Ignoring unrecognized cluster name '{}'", name),
            }
        }
        Self { clusters }
    }

    pub fn from_ids<I: IntoIterator<Item = u16>>(ids: I) -> Self {
        Self {
            clusters: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, cluster: u16) -> bool {
        self.clusters.contains(&cluster)
    }

    pub fn has_tunnel(&self) -> bool {
        self.contains(TUNNEL_CLUSTER_ID)
    }

    pub fn has_native(&self) -> bool {
        NATIVE_DETECTION_CLUSTERS.iter().any(|c| self.contains(*c))
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.clusters.iter().copied()
    }
}

/// Which protocol(s) a device speaks. Fixed once the device is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolMode {
    /// Native ZCL clusters only
    Zigbee,
    /// DP tunnel only
    Proprietary,
    /// Both the tunnel and native clusters
    Hybrid,
}

impl ProtocolMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolMode::Zigbee => "ZIGBEE",
            ProtocolMode::Proprietary => "PROPRIETARY",
            ProtocolMode::Hybrid => "HYBRID",
        }
    }

    /// True when the device carries the DP tunnel.
    pub fn uses_tunnel(self) -> bool {
        !matches!(self, ProtocolMode::Zigbee)
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a cluster set. Never fails: empty or unknown sets are ZIGBEE.
pub fn detect(clusters: &ClusterSet) -> ProtocolMode {
    let tunnel = clusters.has_tunnel();
    let native = clusters.has_native();
    let mode = match (tunnel, native) {
        (true, true) => ProtocolMode::Hybrid,
        (true, false) => ProtocolMode::Proprietary,
        (false, _) => ProtocolMode::Zigbee,
    };
    debug!(
        "Detected {} (tunnel: {}, native: {}, clusters: {:?})",
        mode, tunnel, native, clusters.clusters
    );
    mode
}

/// Where a capability lives on the native side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NativeBinding {
    pub capability: &'static str,
    pub cluster: u16,
    pub attribute: u16,
}

const fn bind(capability: &'static str, cluster: u16, attribute: u16) -> NativeBinding {
    NativeBinding {
        capability,
        cluster,
        attribute,
    }
}

pub const NATIVE_BINDINGS: &[NativeBinding] = &[
    bind("onoff", id::ON_OFF, 0x0000),
    bind("dim", id::LEVEL_CONTROL, 0x0000),
    bind("light_hue", id::COLOR_CONTROL, 0x0000),
    bind("light_saturation", id::COLOR_CONTROL, 0x0001),
    bind("light_temperature", id::COLOR_CONTROL, 0x0007),
    bind("measure_battery", id::POWER_CONFIG, 0x0021),
    bind("locked", id::DOOR_LOCK, 0x0000),
    bind("windowcoverings_set", id::WINDOW_COVERING, 0x0008),
    bind("target_temperature", id::THERMOSTAT, 0x0012),
    bind("measure_luminance", id::ILLUMINANCE_MEASUREMENT, 0x0000),
    bind("measure_temperature", id::TEMPERATURE_MEASUREMENT, 0x0000),
    bind("measure_humidity", id::HUMIDITY_MEASUREMENT, 0x0000),
    bind("alarm_motion", id::OCCUPANCY_SENSING, 0x0000),
    bind("alarm_contact", id::IAS_ZONE, 0x0002),
    bind("alarm_water", id::IAS_ZONE, 0x0002),
    bind("meter_power", id::METERING, 0x0000),
    bind("measure_voltage", id::ELECTRICAL_MEASUREMENT, 0x0505),
    bind("measure_current", id::ELECTRICAL_MEASUREMENT, 0x0508),
    bind("measure_power", id::ELECTRICAL_MEASUREMENT, 0x050B),
];

/// Native cluster/attribute for a capability. Sub-capabilities such as `onoff.1`
/// share the binding of their base capability.
pub fn binding_for(capability: &str) -> Option<&'static NativeBinding> {
    let base = capability.split('.').next().unwrap_or(capability);
    NATIVE_BINDINGS.iter().find(|b| b.capability == base)
}
