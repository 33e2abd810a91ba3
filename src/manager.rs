//! Management of several adapted devices.
//! Provides lookup by id and a single merged stream of capability updates.

use crate::classifier::CapabilityUpdate;
use crate::cluster::ProtocolMode;
use crate::device::HybridDevice;
use crate::error::{HybridError, Result};
use crate::stats::Diagnostics;
use futures_util::{Stream, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An update accepted by the host of one managed device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerEvent {
    pub device_id: String,
    pub update: CapabilityUpdate,
}

/// Holds initialized devices by id and merges their update streams.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    devices: RwLock<HashMap<String, HybridDevice>>,
    device_tokens: RwLock<HashMap<String, CancellationToken>>,
    event_tx: broadcast::Sender<ManagerEvent>,
    cancel_token: CancellationToken,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                devices: RwLock::new(HashMap::new()),
                device_tokens: RwLock::new(HashMap::new()),
                event_tx,
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    /// Returns a Stream of events from all managed devices.
    pub fn stream(&self) -> impl Stream<Item = ManagerEvent> + Send + 'static {
        let mut rx = self.inner.event_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    /// Add an initialized device.
    ///
    /// Returns an error if a device with the same ID already exists.
    pub async fn add(&self, device: HybridDevice) -> Result<()> {
        let mut devices = self.inner.devices.write().await;
        let mut device_tokens = self.inner.device_tokens.write().await;

        let id = device.id().to_string();
        if devices.contains_key(&id) {
            return Err(HybridError::DuplicateDevice(id));
        }

        let token = self.inner.cancel_token.child_token();
        self.spawn_forwarder(device.clone(), token.clone());

        info!("Device {} ({}) added to manager", id, device.mode());
        devices.insert(id.clone(), device);
        device_tokens.insert(id, token);
        Ok(())
    }

    fn spawn_forwarder(&self, device: HybridDevice, token: CancellationToken) {
        let event_tx = self.inner.event_tx.clone();
        let device_id = device.id().to_string();
        let stream = device.stream();

        tokio::spawn(async move {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    update = stream.next() => match update {
                        Some(update) => {
                            let _ = event_tx.send(ManagerEvent {
                                device_id: device_id.clone(),
                                update,
                            });
                        }
                        None => break,
                    },
                }
            }
            info!("Event forwarding for device {} ended", device_id);
        });
    }

    /// Remove a device and stop its delivery task.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut devices = self.inner.devices.write().await;
        let mut device_tokens = self.inner.device_tokens.write().await;

        match devices.remove(id) {
            Some(device) => {
                if let Some(token) = device_tokens.remove(id) {
                    token.cancel();
                }
                device.stop();
                info!("Device {} removed from manager", id);
                Ok(())
            }
            None => {
                warn!("Attempted to remove non-existent device {}", id);
                Err(HybridError::DeviceNotFound(id.to_string()))
            }
        }
    }

    /// Device ID -> protocol mode.
    pub async fn list(&self) -> HashMap<String, ProtocolMode> {
        let devices = self.inner.devices.read().await;
        devices
            .iter()
            .map(|(id, device)| (id.clone(), device.mode()))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<HybridDevice> {
        self.inner.devices.read().await.get(id).cloned()
    }

    pub async fn diagnostics(&self) -> Vec<Diagnostics> {
        let devices = self.inner.devices.read().await;
        let mut all: Vec<Diagnostics> = devices.values().map(|d| d.diagnostics()).collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    /// Stop forwarding and stop every managed device.
    pub async fn shutdown(&self) {
        self.inner.cancel_token.cancel();

        let mut devices = self.inner.devices.write().await;
        let mut tokens = self.inner.device_tokens.write().await;
        for (id, device) in devices.drain() {
            device.stop();
            info!("Device {} stopped by manager shutdown", id);
        }
        tokens.clear();
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CapabilityHost;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct AcceptAll;

    #[async_trait]
    impl CapabilityHost for AcceptAll {
        fn has_capability(&self, capability: &str) -> bool {
            capability == "onoff"
        }

        async fn update_capability(&self, _capability: &str, _value: Value) -> Result<()> {
            Ok(())
        }
    }

    fn device(id: &str, clusters: &[&str]) -> HybridDevice {
        HybridDevice::builder(id, Arc::new(AcceptAll))
            .clusters(clusters.iter().copied())
            .build()
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let manager = Manager::new();
        manager.add(device("a", &["tuya"])).await.unwrap();
        let err = manager.add(device("a", &["onOff"])).await.unwrap_err();
        assert_eq!(err, HybridError::DuplicateDevice("a".into()));
        assert_eq!(manager.list().await["a"], ProtocolMode::Proprietary);
    }

    #[tokio::test]
    async fn list_and_remove() {
        let manager = Manager::new();
        manager.add(device("a", &["tuya", "onOff"])).await.unwrap();
        manager.add(device("b", &["onOff"])).await.unwrap();

        let list = manager.list().await;
        assert_eq!(list["a"], ProtocolMode::Hybrid);
        assert_eq!(list["b"], ProtocolMode::Zigbee);

        let b = manager.get("b").await.unwrap();
        manager.remove("b").await.unwrap();
        assert!(b.is_stopped());
        assert!(manager.get("b").await.is_none());
        assert_eq!(
            manager.remove("b").await.unwrap_err(),
            HybridError::DeviceNotFound("b".into())
        );
    }

    #[tokio::test]
    async fn merged_stream_tags_device_id() {
        let manager = Manager::new();
        let events = manager.stream();
        tokio::pin!(events);

        let dev = device("relay", &["tuya"]);
        manager.add(dev.clone()).await.unwrap();
        dev.receive(json!({"dp": 1, "value": 1}));

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), events.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.device_id, "relay");
        assert_eq!(event.update.capability, "onoff");
        assert_eq!(event.update.value, json!(true));
    }

    #[tokio::test]
    async fn shutdown_stops_devices() {
        let manager = Manager::new();
        let dev = device("a", &["tuya"]);
        manager.add(dev.clone()).await.unwrap();
        manager.shutdown().await;
        assert!(dev.is_stopped());
        assert!(manager.list().await.is_empty());
    }
}
