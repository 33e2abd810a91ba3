//! Outward capability writes, dispatched to the DP tunnel or the native ZCL stack.

use crate::catalog::ActiveMapping;
use crate::cluster::{ProtocolMode, binding_for};
use crate::error::{HybridError, Result};
use crate::protocol::{DataPoint, DpValue, FrameCodec, TunnelFrame};
use crate::stats::Counters;
use crate::transport::{NativeTransport, TunnelTransport};
use chrono::{Datelike, Timelike};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// Which side of the device a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Route {
    Proprietary,
    Zigbee,
}

pub struct ValueRouter {
    device_id: String,
    mode: ProtocolMode,
    mapping: Arc<ActiveMapping>,
    codec: Arc<dyn FrameCodec>,
    tunnel: Option<Arc<dyn TunnelTransport>>,
    native: Option<Arc<dyn NativeTransport>>,
    seq: AtomicU16,
    counters: Arc<Counters>,
}

impl ValueRouter {
    pub(crate) fn new(
        device_id: &str,
        mode: ProtocolMode,
        mapping: Arc<ActiveMapping>,
        codec: Arc<dyn FrameCodec>,
        tunnel: Option<Arc<dyn TunnelTransport>>,
        native: Option<Arc<dyn NativeTransport>>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            mode,
            mapping,
            codec,
            tunnel,
            native,
            seq: AtomicU16::new(rand::random()),
            counters,
        }
    }

    pub fn route(&self, capability: &str) -> Route {
        match self.mode {
            ProtocolMode::Zigbee => Route::Zigbee,
            ProtocolMode::Proprietary => Route::Proprietary,
            ProtocolMode::Hybrid if self.mapping.has_capability(capability) => Route::Proprietary,
            ProtocolMode::Hybrid => Route::Zigbee,
        }
    }

    /// Write a capability value. One transmission on success, none on failure.
    pub async fn write(&self, capability: &str, value: &Value) -> Result<()> {
        let route = self.route(capability);
        let result = match route {
            Route::Proprietary => self.write_proprietary(capability, value).await,
            Route::Zigbee => self.write_native(capability, value).await,
        };

        match &result {
            Ok(()) => Counters::bump(&self.counters.writes_ok),
            Err(e) => {
                Counters::bump(&self.counters.writes_failed);
                warn!(
                    "Device {}: write {}={} via {:?} failed: {}",
                    self.device_id, capability, value, route, e
                );
            }
        }
        result
    }

    /// Ask the device to report one DP again. The answer arrives as a normal DP report.
    pub async fn query(&self, dp: u8) -> Result<()> {
        let tunnel = self.tunnel()?;
        self.send(tunnel, DataPoint::query(dp), "query")
            .await
            .inspect_err(|e| {
                warn!(
                    "Device {}: query of DP {} failed: {}",
                    self.device_id, dp, e
                );
            })
    }

    /// Push a wall-clock time to the device on the time sync DP.
    pub async fn time_sync<T: Datelike + Timelike>(&self, time: &T) -> Result<()> {
        let tunnel = self.tunnel()?;
        let dp = DataPoint::time_sync(time)?;
        self.send(tunnel, dp, "time sync").await.inspect_err(|e| {
            warn!("Device {}: time sync failed: {}", self.device_id, e);
        })
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn tunnel(&self) -> Result<&Arc<dyn TunnelTransport>> {
        if !self.mode.uses_tunnel() {
            return Err(HybridError::TransportUnavailable("tunnel"));
        }
        self.tunnel
            .as_ref()
            .ok_or(HybridError::TransportUnavailable("tunnel"))
    }

    async fn write_proprietary(&self, capability: &str, value: &Value) -> Result<()> {
        let entry = self
            .mapping
            .for_capability(capability)
            .ok_or_else(|| HybridError::Unmapped(capability.to_string()))?;
        let tunnel = self.tunnel()?;

        let dp_value = DpValue::from_capability(entry.value_type, value, entry.scale)?;
        self.send(tunnel, DataPoint::new(entry.dp, dp_value), capability)
            .await
    }

    /// Encode one record into a fresh frame and transmit it exactly once.
    async fn send(
        &self,
        tunnel: &Arc<dyn TunnelTransport>,
        dp: DataPoint,
        what: &str,
    ) -> Result<()> {
        let frame = TunnelFrame {
            seq: self.next_seq(),
            dps: vec![dp],
        };
        let payload = self.codec.encode(&frame).inspect_err(|e| {
            Counters::bump(&self.counters.codec_errors);
            warn!(
                "Device {}: failed to encode {:?}: {}",
                self.device_id, frame, e
            );
        })?;

        let raw = hex::encode(&payload);
        debug!(
            "Device {}: {} -> DP {} ({}), payload {}",
            self.device_id,
            what,
            frame.dps[0].index,
            frame.dps[0].value_type(),
            raw
        );
        tunnel.transmit(payload).await.inspect_err(|e| {
            warn!(
                "Device {}: transmit of {} failed: {}",
                self.device_id, raw, e
            );
        })
    }

    async fn write_native(&self, capability: &str, value: &Value) -> Result<()> {
        let native = self
            .native
            .as_ref()
            .ok_or(HybridError::TransportUnavailable("native"))?;
        if let Some(binding) = binding_for(capability) {
            debug!(
                "Device {}: {} -> cluster 0x{:04X} attribute 0x{:04X}",
                self.device_id, capability, binding.cluster, binding.attribute
            );
        }
        native.write_capability(capability, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG;
    use crate::protocol::{TuyaCodec, unpack_frame};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tunnel {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl TunnelTransport for Tunnel {
        async fn transmit(&self, payload: Vec<u8>) -> Result<()> {
            self.sent.lock().unwrap().push(payload);
            if self.fail {
                return Err(HybridError::Transport("no ack".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Native {
        writes: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl NativeTransport for Native {
        async fn write_capability(&self, capability: &str, value: &Value) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((capability.to_string(), value.clone()));
            Ok(())
        }
    }

    struct BrokenCodec;

    impl FrameCodec for BrokenCodec {
        fn encode(&self, _frame: &TunnelFrame) -> Result<Vec<u8>> {
            Err(HybridError::PayloadTooLarge(70000))
        }

        fn decode(&self, _data: &[u8]) -> Result<TunnelFrame> {
            Err(HybridError::MalformedFrame("broken".into()))
        }
    }

    fn router(
        mode: ProtocolMode,
        caps: &'static [&'static str],
        tunnel: Arc<Tunnel>,
        native: Arc<Native>,
        codec: Arc<dyn FrameCodec>,
    ) -> ValueRouter {
        let mapping = ActiveMapping::build(mode, CATALOG, |c| caps.iter().any(|k| *k == c));
        ValueRouter::new(
            "test",
            mode,
            Arc::new(mapping),
            codec,
            Some(tunnel),
            Some(native),
            Arc::new(Counters::default()),
        )
    }

    #[tokio::test]
    async fn proprietary_onoff_write() {
        let tunnel = Arc::new(Tunnel::default());
        let native = Arc::new(Native::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            native.clone(),
            Arc::new(TuyaCodec),
        );

        r.write("onoff", &json!(true)).await.unwrap();

        let sent = tunnel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][2..], &[0x01, 0x01, 0x00, 0x01, 0x01]);
        assert!(native.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zigbee_write_bypasses_codec() {
        let tunnel = Arc::new(Tunnel::default());
        let native = Arc::new(Native::default());
        let r = router(
            ProtocolMode::Zigbee,
            &["dim"],
            tunnel.clone(),
            native.clone(),
            Arc::new(BrokenCodec),
        );

        assert_eq!(r.route("dim"), Route::Zigbee);
        r.write("dim", &json!(0.5)).await.unwrap();
        assert!(tunnel.sent.lock().unwrap().is_empty());
        assert_eq!(
            native.writes.lock().unwrap().as_slice(),
            &[("dim".to_string(), json!(0.5))]
        );
    }

    #[tokio::test]
    async fn hybrid_routes_by_mapping() {
        let tunnel = Arc::new(Tunnel::default());
        let native = Arc::new(Native::default());
        let r = router(
            ProtocolMode::Hybrid,
            &["onoff", "light_hue"],
            tunnel.clone(),
            native.clone(),
            Arc::new(TuyaCodec),
        );
        assert_eq!(r.route("onoff"), Route::Proprietary);
        assert_eq!(r.route("light_hue"), Route::Zigbee);

        r.write("light_hue", &json!(0.3)).await.unwrap();
        assert!(tunnel.sent.lock().unwrap().is_empty());
        assert_eq!(native.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unmapped_capability_in_proprietary_mode() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        let err = r.write("dim", &json!(0.4)).await.unwrap_err();
        assert_eq!(err, HybridError::Unmapped("dim".into()));
        assert!(tunnel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_scaled_write_still_transmits() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["dim"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        r.write("dim", &json!(0.0001)).await.unwrap();

        let sent = tunnel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let frame = unpack_frame(&sent[0]).unwrap();
        assert_eq!(frame.dps, vec![DataPoint::new(2, DpValue::Number(0))]);
    }

    #[tokio::test]
    async fn codec_failure_transmits_nothing() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(BrokenCodec),
        );
        let err = r.write("onoff", &json!(true)).await.unwrap_err();
        assert!(err.is_codec_error());
        assert!(tunnel.sent.lock().unwrap().is_empty());
        assert_eq!(r.counters.codec_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let tunnel = Arc::new(Tunnel {
            fail: true,
            ..Default::default()
        });
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        let err = r.write("onoff", &json!(false)).await.unwrap_err();
        assert!(matches!(err, HybridError::Transport(_)));
        assert_eq!(tunnel.sent.lock().unwrap().len(), 1);
        assert_eq!(r.counters.writes_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn sequence_number_advances_per_write() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        r.write("onoff", &json!(true)).await.unwrap();
        r.write("onoff", &json!(false)).await.unwrap();

        let sent = tunnel.sent.lock().unwrap();
        let first = unpack_frame(&sent[0]).unwrap().seq;
        let second = unpack_frame(&sent[1]).unwrap().seq;
        assert_eq!(second, first.wrapping_add(1));
    }

    #[tokio::test]
    async fn query_sends_one_empty_record() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        r.query(15).await.unwrap();

        let sent = tunnel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][2..], &[0x0F, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn query_follows_write_failure_rules() {
        let tunnel = Arc::new(Tunnel {
            fail: true,
            ..Default::default()
        });
        let r = router(
            ProtocolMode::Hybrid,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        assert!(matches!(
            r.query(1).await.unwrap_err(),
            HybridError::Transport(_)
        ));
        assert_eq!(tunnel.sent.lock().unwrap().len(), 1);

        let quiet = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["onoff"],
            quiet.clone(),
            Arc::new(Native::default()),
            Arc::new(BrokenCodec),
        );
        assert!(r.query(1).await.unwrap_err().is_codec_error());
        assert!(quiet.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zigbee_device_has_no_tunnel_for_query() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Zigbee,
            &["onoff"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        assert_eq!(
            r.query(1).await.unwrap_err(),
            HybridError::TransportUnavailable("tunnel")
        );
        assert!(tunnel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn time_sync_sends_clock_on_dp_0x24() {
        let tunnel = Arc::new(Tunnel::default());
        let r = router(
            ProtocolMode::Proprietary,
            &["measure_temperature"],
            tunnel.clone(),
            Arc::new(Native::default()),
            Arc::new(TuyaCodec),
        );
        let at = chrono::NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        r.time_sync(&at).await.unwrap();

        let sent = tunnel.sent.lock().unwrap();
        let frame = unpack_frame(&sent[0]).unwrap();
        assert_eq!(
            frame.dps,
            vec![DataPoint::new(0x24, DpValue::Raw(vec![26, 3, 4, 8, 30, 0, 2]))]
        );
    }
}
