/**
 * Hybrid Device Simulation
 *
 * Drives a simulated 2-gang hybrid switch and a DP-only climate sensor through the
 * adapter: outward writes, DP reports, raw tunnel frames and native reports.
 *
 * Run with `RUST_LOG=debug cargo run --example hybrid_sim` to see routing decisions.
 */
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tuya_hybrid::protocol::{DataPoint, DpValue, TunnelFrame, pack_frame};
use tuya_hybrid::{
    CapabilityHost, HybridDevice, Manager, NativeTransport, Result, TunnelTransport,
};

struct PrintTunnel(&'static str);

#[async_trait]
impl TunnelTransport for PrintTunnel {
    async fn transmit(&self, payload: Vec<u8>) -> Result<()> {
        println!("[TUNNEL] {} <- {}", self.0, hex::encode(payload));
        Ok(())
    }
}

struct PrintNative(&'static str);

#[async_trait]
impl NativeTransport for PrintNative {
    async fn write_capability(&self, capability: &str, value: &Value) -> Result<()> {
        println!("[ZCL] {} <- {} = {}", self.0, capability, value);
        Ok(())
    }

    fn on_report(&self, payload: Value) {
        println!("[ZCL] {} report {}", self.0, payload);
    }
}

struct Host(&'static [&'static str]);

#[async_trait]
impl CapabilityHost for Host {
    fn has_capability(&self, capability: &str) -> bool {
        self.0.iter().any(|c| *c == capability)
    }

    async fn update_capability(&self, _capability: &str, _value: Value) -> Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    println!("--- tuya-hybrid {} - Simulation ---", tuya_hybrid::version());

    // 1. Initialize devices
    let switch = HybridDevice::builder("switch", Arc::new(Host(&["onoff", "onoff.1", "dim"])))
        .clusters(["basic", "onOff", "levelControl", "manuSpecificTuya"])
        .tunnel(Arc::new(PrintTunnel("switch")))
        .native(Arc::new(PrintNative("switch")))
        .build();
    let sensor = HybridDevice::builder(
        "sensor",
        Arc::new(Host(&["measure_temperature", "measure_humidity", "measure_battery"])),
    )
    .clusters(["basic", "tuya"])
    .tunnel(Arc::new(PrintTunnel("sensor")))
    .build();

    let manager = Manager::new();
    manager.add(switch.clone()).await?;
    manager.add(sensor.clone()).await?;
    for (id, mode) in manager.list().await {
        println!("[INFO] {} detected as {}", id, mode);
    }

    let events = manager.stream();
    tokio::pin!(events);

    // 2. Outward writes
    switch.write("onoff", json!(true)).await?;
    switch.write("light_hue", json!(0.4)).await?;
    sensor.sync_time().await?;
    sensor.query(1).await?;
    if let Err(e) = sensor.write("dim", json!(0.5)).await {
        println!("[WARN] sensor dim write rejected: {} (code {})", e, e.code());
    }

    // 3. Inbound reports
    switch.receive(json!({"dp": 2, "value": false}));
    switch.receive(json!({"cluster": "onOff", "attribute": "onOff", "value": 1}));
    sensor.receive(json!({"dpId": 99, "dpValue": 3}));
    let frame = pack_frame(&TunnelFrame {
        seq: 1,
        dps: vec![
            DataPoint::new(1, DpValue::Number(235)),
            DataPoint::new(2, DpValue::Number(48)),
            DataPoint::new(4, DpValue::Number(91)),
        ],
    })?;
    sensor.receive_frame(&frame)?;

    // 4. Collect the accepted updates
    let timeout = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(timeout);
    loop {
        tokio::select! {
            Some(event) = events.next() => {
                println!("[EVENT] {}: {} = {}", event.device_id, event.update.capability, event.update.value);
            }
            _ = &mut timeout => break,
        }
    }

    println!("{}", serde_json::to_string_pretty(&manager.diagnostics().await)?);
    manager.shutdown().await;
    Ok(())
}
