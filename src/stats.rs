//! Per-device counters and their serializable snapshot.

use crate::cluster::ProtocolMode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub proprietary_reports: AtomicU64,
    pub native_reports: AtomicU64,
    pub dropped_reports: AtomicU64,
    pub codec_errors: AtomicU64,
    pub writes_ok: AtomicU64,
    pub writes_failed: AtomicU64,
    pub updates_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, device_id: &str, mode: ProtocolMode, mapped_dps: usize) -> Diagnostics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Diagnostics {
            device_id: device_id.to_string(),
            mode,
            mapped_dps,
            proprietary_reports: load(&self.proprietary_reports),
            native_reports: load(&self.native_reports),
            dropped_reports: load(&self.dropped_reports),
            codec_errors: load(&self.codec_errors),
            writes_ok: load(&self.writes_ok),
            writes_failed: load(&self.writes_failed),
            updates_delivered: load(&self.updates_delivered),
            delivery_failures: load(&self.delivery_failures),
        }
    }
}

/// Point-in-time view of a device's adapter activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub device_id: String,
    pub mode: ProtocolMode,
    /// Number of active mapping entries
    pub mapped_dps: usize,
    pub proprietary_reports: u64,
    pub native_reports: u64,
    /// Reports for DPs without an active mapping, plus undecodable frames
    pub dropped_reports: u64,
    pub codec_errors: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub updates_delivered: u64,
    pub delivery_failures: u64,
}
