/*
 *  pipeline_integration.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  End-to-end tests over the mock peripherals and an in-memory store:
 *  sampling through level mapping to the strip, and the aggregation
 *  server's broadcast/persist paths over real sockets.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use noisled::alert::AlertChannel;
use noisled::level::LevelMapper;
use noisled::sampler::{MockAdc, Sampler, CALIBRATION_ROUNDS};
use noisled::server::{AggregationServer, ServerConfig};
use noisled::state::{Calibration, SharedLevels};
use noisled::store::{MemoryStore, RecordStatus};
use noisled::ws2812::{MockTransport, Ws2812Encoder};

async fn start_server(
    window: Duration,
    levels: Arc<SharedLevels>,
    alert: Arc<AlertChannel>,
    store: Arc<MemoryStore>,
) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let server = AggregationServer::new(
        ServerConfig {
            port: 0,
            device_id: "sensor_noise_001".to_string(),
            window,
            debounce: Duration::ZERO,
        },
        levels,
        alert,
        store,
    );
    let handle = tokio::spawn(server.serve(listener, stop_rx));
    (addr, stop_tx, handle)
}

#[tokio::test]
async fn test_alert_broadcast_and_persist() {
    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let store = Arc::new(MemoryStore::new());
    let (addr, stop_tx, handle) =
        start_server(Duration::from_secs(60), levels, alert.clone(), store.clone()).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    // Let the accept arm register both before the alert fires.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alert.set(29000);

    for client in [&mut first, &mut second] {
        let mut buf = [0u8; 32];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("no broadcast received")
            .unwrap();
        assert_eq!(&buf[..n], b"29000");
    }

    // One alert row, and the latch is clear again afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, "sensor_noise_001");
    assert_eq!(records[0].value, 29000);
    assert_eq!(records[0].status, RecordStatus::Alert);
    assert_eq!(alert.peek(), None);

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnected_client_does_not_break_broadcast() {
    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let store = Arc::new(MemoryStore::new());
    let (addr, stop_tx, handle) =
        start_server(Duration::from_secs(60), levels, alert.clone(), store.clone()).await;

    let gone = TcpStream::connect(addr).await.unwrap();
    let mut stays = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Peer close is observed and the client deregistered.
    drop(gone);
    tokio::time::sleep(Duration::from_millis(100)).await;

    alert.set(31000);
    let mut buf = [0u8; 32];
    let n = timeout(Duration::from_secs(2), stays.read(&mut buf))
        .await
        .expect("surviving client got no broadcast")
        .unwrap();
    assert_eq!(&buf[..n], b"31000");

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stale_alert_cleared_at_startup() {
    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let store = Arc::new(MemoryStore::new());

    // Latched before the server even starts: swallowed, not persisted.
    alert.set(12345);
    let (_addr, stop_tx, handle) =
        start_server(Duration::from_secs(60), levels, alert.clone(), store.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(alert.peek(), None);
    assert!(store.records().is_empty());

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_window_average_persisted() {
    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let store = Arc::new(MemoryStore::new());
    let (_addr, stop_tx, handle) = start_server(
        Duration::from_millis(300),
        levels.clone(),
        alert,
        store.clone(),
    )
    .await;

    levels.publish_display(16200);

    // Two window boundaries pass; every ingested sample is the same value,
    // so the average is exact.
    tokio::time::sleep(Duration::from_millis(750)).await;

    let records = store.records();
    assert!(!records.is_empty(), "no window record persisted");
    for record in &records {
        assert_eq!(record.value, 16200);
        assert_eq!(record.status, RecordStatus::Normal);
    }

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_empty_window_persists_nothing() {
    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let store = Arc::new(MemoryStore::new());
    let (_addr, stop_tx, handle) =
        start_server(Duration::from_millis(200), levels, alert, store.clone()).await;

    // No display value ever published: boundaries come and go silently.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.records().is_empty());

    stop_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sampler_to_strip_pipeline() {
    // Quiet room during calibration, then one loud burst.
    let mut codes = vec![16000i16; CALIBRATION_ROUNDS as usize];
    codes.push(20000);
    let adc = MockAdc::with_codes(codes);

    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());
    let transport = MockTransport::new();
    let transport_state = transport.state();

    let mut sampler = Sampler::new(adc, levels.clone());
    let cal = sampler.calibrate().await.unwrap();
    // baseline 16000, span min(32767-16000, 16000) = 16000, >>3 = 2000.
    assert_eq!(cal, Calibration { baseline: 16000, dynamic_range: 2000 });

    let mapper = LevelMapper::new(
        levels.clone(),
        alert.clone(),
        Ws2812Encoder::new(transport),
        cal,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(sampler.run(stop_rx.clone()));
    tokio::spawn(mapper.run(stop_rx));

    // deviation 4000 over range 2000 clamps to level 7: alert territory.
    let value = timeout(Duration::from_secs(30), alert.wait_for_alert())
        .await
        .expect("loud burst never latched the alert");
    assert_eq!(value, 20000);
    assert_eq!(levels.display(), Some(20000));
    assert!(!transport_state.lock().unwrap().sent.is_empty());

    stop_tx.send(true).unwrap();
}
