//! # tuya-hybrid
//!
//! Hybrid Zigbee / Tuya-DP protocol adapter. Detects whether a device speaks
//! native ZCL, the proprietary DP tunnel on cluster 0xEF00, or both, and routes
//! capability reads and writes through the right protocol.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # async fn run(host: Arc<dyn tuya_hybrid::CapabilityHost>, tunnel: Arc<dyn tuya_hybrid::TunnelTransport>) {
//! use tuya_hybrid::HybridDevice;
//!
//! let device = HybridDevice::builder("switch-1", host)
//!     .clusters(["basic", "onOff", "manuSpecificTuya"])
//!     .tunnel(tunnel)
//!     .build();
//! let _ = device.write("onoff", serde_json::json!(true)).await;
//! # }
//! ```
//!
#[macro_use]
mod macros;
pub mod catalog;
pub mod classifier;
pub mod cluster;
pub mod device;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod router;
pub mod stats;
pub mod transport;

pub use catalog::{ActiveMapping, CATALOG, MappingCandidate};
pub use classifier::{
    CapabilityUpdate, DEFAULT_LOW_BATTERY_THRESHOLD, DpReport, Inbound, InboundClassifier,
};
pub use cluster::{ClusterSet, ProtocolMode, detect};
pub use device::{DEFAULT_QUEUE_CAPACITY, HybridDevice, HybridDeviceBuilder};
pub use error::{HybridError, Result};
pub use manager::{Manager, ManagerEvent};
pub use protocol::{DataPoint, DpType, DpValue, FrameCodec, TunnelFrame, TuyaCodec};
pub use router::{Route, ValueRouter};
pub use stats::Diagnostics;
pub use transport::{CapabilityHost, NativeTransport, TunnelTransport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
