//! Collaborator traits at the edges of the adapter.
//!
//! The adapter never talks to a radio or a host framework directly. The tunnel,
//! the native ZCL stack and the upward capability store are plugged in through
//! these traits, shared as `Arc<dyn ...>`.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Sends encoded payloads through the 0xEF00 cluster.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Transmit one tunnel payload. A failure is final; the adapter does not retry.
    async fn transmit(&self, payload: Vec<u8>) -> Result<()>;
}

/// The native ZCL side of the device.
#[async_trait]
pub trait NativeTransport: Send + Sync {
    /// Write a capability through the standard cluster that backs it.
    async fn write_capability(&self, capability: &str, value: &Value) -> Result<()>;

    /// Hand a native attribute report to the native pipeline.
    fn on_report(&self, _payload: Value) {}
}

/// The application side that owns capability values.
#[async_trait]
pub trait CapabilityHost: Send + Sync {
    /// Whether the device declares this capability. Queried while building the mapping.
    fn has_capability(&self, capability: &str) -> bool;

    async fn update_capability(&self, capability: &str, value: Value) -> Result<()>;
}
