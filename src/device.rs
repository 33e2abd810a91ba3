//! One adapted device: protocol detection, mapping, routing and upward delivery.
//! Inbound messages and outward writes are independent; capability updates cross a
//! bounded queue to a background task that feeds the host.

use crate::catalog::{ActiveMapping, CATALOG, MappingCandidate};
use crate::classifier::{
    CapabilityUpdate, DEFAULT_LOW_BATTERY_THRESHOLD, Inbound, InboundClassifier,
};
use crate::cluster::{self, ClusterSet, ProtocolMode};
use crate::error::Result;
use crate::protocol::{FrameCodec, TuyaCodec};
use crate::router::{Route, ValueRouter};
use crate::stats::{Counters, Diagnostics};
use crate::transport::{CapabilityHost, NativeTransport, TunnelTransport};
use chrono::{Datelike, Local, Timelike};
use futures_core::stream::Stream;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of the upward delivery queue unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Configures and initializes a [`HybridDevice`].
pub struct HybridDeviceBuilder {
    id: String,
    host: Arc<dyn CapabilityHost>,
    clusters: ClusterSet,
    tunnel: Option<Arc<dyn TunnelTransport>>,
    native: Option<Arc<dyn NativeTransport>>,
    codec: Arc<dyn FrameCodec>,
    catalog: &'static [MappingCandidate],
    queue_capacity: usize,
    low_battery_threshold: f64,
}

impl HybridDeviceBuilder {
    pub fn new<I: Into<String>>(id: I, host: Arc<dyn CapabilityHost>) -> Self {
        Self {
            id: id.into(),
            host,
            clusters: ClusterSet::default(),
            tunnel: None,
            native: None,
            codec: Arc::new(TuyaCodec),
            catalog: CATALOG,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
        }
    }

    /// Clusters by name, alias or numeric string (e.g. `"onOff"`, `"manuSpecificTuya"`, `"0xEF00"`).
    pub fn clusters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.clusters = ClusterSet::from_names(names);
        self
    }

    pub fn cluster_ids<I: IntoIterator<Item = u16>>(mut self, ids: I) -> Self {
        self.clusters = ClusterSet::from_ids(ids);
        self
    }

    pub fn tunnel(mut self, tunnel: Arc<dyn TunnelTransport>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn native(mut self, native: Arc<dyn NativeTransport>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn catalog(mut self, catalog: &'static [MappingCandidate]) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Battery percentage at or below which `alarm_battery` is raised.
    pub fn low_battery_threshold(mut self, percent: f64) -> Self {
        self.low_battery_threshold = percent;
        self
    }

    /// Detects the protocol mode, builds the mapping and starts the delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> HybridDevice {
        let mode = cluster::detect(&self.clusters);
        let host = self.host;
        let mapping = Arc::new(ActiveMapping::build(mode, self.catalog, |c| {
            host.has_capability(c)
        }));
        info!(
            "Device {} initialized in {} mode with {} DP mappings",
            self.id,
            mode,
            mapping.len()
        );
        if mode.uses_tunnel() && self.tunnel.is_none() {
            warn!(
                "Device {} exposes the DP tunnel but no tunnel transport was given",
                self.id
            );
        }

        let counters = Arc::new(Counters::default());
        let router = ValueRouter::new(
            &self.id,
            mode,
            mapping.clone(),
            self.codec.clone(),
            self.tunnel,
            self.native.clone(),
            counters.clone(),
        );
        let classifier = InboundClassifier::new(
            &self.id,
            mapping.clone(),
            self.codec,
            counters.clone(),
            self.low_battery_threshold,
        );

        let (update_tx, update_rx) = mpsc::channel(self.queue_capacity);
        let (broadcast_tx, _) = broadcast::channel(self.queue_capacity);
        let cancel_token = CancellationToken::new();

        tokio::spawn(run_delivery_task(
            self.id.clone(),
            host,
            update_rx,
            broadcast_tx.clone(),
            counters.clone(),
            cancel_token.clone(),
        ));

        HybridDevice {
            inner: Arc::new(DeviceInner {
                id: self.id,
                mode,
                mapping,
                router,
                classifier,
                native: self.native,
                counters,
                update_tx,
                broadcast_tx,
                cancel_token,
            }),
        }
    }
}

/// A device behind the hybrid adapter. Cheap to clone.
#[derive(Clone)]
pub struct HybridDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: String,
    mode: ProtocolMode,
    mapping: Arc<ActiveMapping>,
    router: ValueRouter,
    classifier: InboundClassifier,
    native: Option<Arc<dyn NativeTransport>>,
    counters: Arc<Counters>,
    update_tx: mpsc::Sender<CapabilityUpdate>,
    broadcast_tx: broadcast::Sender<CapabilityUpdate>,
    cancel_token: CancellationToken,
}

impl HybridDevice {
    pub fn builder<I: Into<String>>(id: I, host: Arc<dyn CapabilityHost>) -> HybridDeviceBuilder {
        HybridDeviceBuilder::new(id, host)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn mode(&self) -> ProtocolMode {
        self.inner.mode
    }

    pub fn mapping(&self) -> &ActiveMapping {
        &self.inner.mapping
    }

    pub fn route(&self, capability: &str) -> Route {
        self.inner.router.route(capability)
    }

    /// Writes a capability through the tunnel or the native stack.
    ///
    /// Failures are returned as-is and never retried.
    pub async fn write(&self, capability: &str, value: Value) -> Result<()> {
        self.inner.router.write(capability, &value).await
    }

    /// Asks the device to report `dp` again through the tunnel.
    pub async fn query(&self, dp: u8) -> Result<()> {
        self.inner.router.query(dp).await
    }

    /// Sends the local wall-clock time to the device.
    pub async fn sync_time(&self) -> Result<()> {
        self.sync_time_at(&Local::now().naive_local()).await
    }

    pub async fn sync_time_at<T: Datelike + Timelike>(&self, time: &T) -> Result<()> {
        self.inner.router.time_sync(time).await
    }

    /// Handles an inbound payload.
    ///
    /// DP reports are translated and queued for the host; the returned updates are
    /// the ones queued. Native payloads go to the native transport and yield nothing.
    pub fn receive(&self, payload: Value) -> Vec<CapabilityUpdate> {
        match InboundClassifier::classify(&payload) {
            Inbound::Proprietary(report) => {
                let updates = self.inner.classifier.translate(&report);
                self.enqueue(&updates);
                updates
            }
            Inbound::Native(payload) => {
                Counters::bump(&self.inner.counters.native_reports);
                match &self.inner.native {
                    Some(native) => native.on_report(payload),
                    None => debug!(
                        "Device {}: no native pipeline, ignoring {}",
                        self.inner.id, payload
                    ),
                }
                Vec::new()
            }
        }
    }

    /// Handles a raw tunnel frame. Undecodable frames are dropped and reported as errors.
    pub fn receive_frame(&self, data: &[u8]) -> Result<Vec<CapabilityUpdate>> {
        let reports = self.inner.classifier.classify_frame(data).inspect_err(|_| {
            Counters::bump(&self.inner.counters.dropped_reports);
        })?;
        let updates: Vec<CapabilityUpdate> = reports
            .iter()
            .flat_map(|r| self.inner.classifier.translate(r))
            .collect();
        self.enqueue(&updates);
        Ok(updates)
    }

    fn enqueue(&self, updates: &[CapabilityUpdate]) {
        for update in updates {
            match self.inner.update_tx.try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(update)) => {
                    Counters::bump(&self.inner.counters.delivery_failures);
                    warn!(
                        "Device {}: delivery queue full, dropping {}",
                        self.inner.id, update.capability
                    );
                }
                Err(TrySendError::Closed(update)) => {
                    Counters::bump(&self.inner.counters.delivery_failures);
                    warn!(
                        "Device {}: stopped, dropping {}",
                        self.inner.id, update.capability
                    );
                }
            }
        }
    }

    /// Returns a Stream of the capability updates accepted by the host.
    pub fn stream(&self) -> impl Stream<Item = CapabilityUpdate> + Send + 'static {
        let mut rx = self.inner.broadcast_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(update) => yield update,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner
            .counters
            .snapshot(&self.inner.id, self.inner.mode, self.inner.mapping.len())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    /// Stops the delivery task. Updates still queued are discarded.
    pub fn stop(&self) {
        if !self.is_stopped() {
            info!("Stopping device {}", self.inner.id);
        }
        self.inner.cancel_token.cancel();
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run_delivery_task(
    id: String,
    host: Arc<dyn CapabilityHost>,
    mut rx: mpsc::Receiver<CapabilityUpdate>,
    broadcast_tx: broadcast::Sender<CapabilityUpdate>,
    counters: Arc<Counters>,
    token: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = token.cancelled() => break,
            update = rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        match host
            .update_capability(&update.capability, update.value.clone())
            .await
        {
            Ok(()) => {
                Counters::bump(&counters.updates_delivered);
                let _ = broadcast_tx.send(update);
            }
            Err(e) => {
                Counters::bump(&counters.delivery_failures);
                warn!(
                    "Device {}: host rejected {} = {}: {}",
                    id, update.capability, update.value, e
                );
            }
        }
    }
    debug!("Delivery task for device {} finished", id);
}
