/*
 *  server.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  TCP aggregation server. One select! loop owns the listener, the client
 *  registry, the averaging window and the alert read side; per-connection
 *  reader tasks exist only to observe peer close.
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

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};

use crate::alert::AlertChannel;
use crate::state::SharedLevels;
use crate::store::{PersistedRecord, RecordStatus, RecordStore};
use crate::window::AggregationWindow;

/// Default listen port of the aggregation service.
pub const DEFAULT_PORT: u16 = 5077;

/// Cadence at which the latest display value is folded into the window.
pub const INGEST_PERIOD: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind aggregation listener: {0}")]
    Bind(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub device_id: String,
    /// Averaging window length.
    pub window: Duration,
    /// Hold-off after an alert broadcast before the latch is cleared, so a
    /// sustained noise does not storm the database.
    pub debounce: Duration,
}

pub struct AggregationServer {
    cfg: ServerConfig,
    levels: Arc<SharedLevels>,
    alert: Arc<AlertChannel>,
    store: Arc<dyn RecordStore>,
}

impl AggregationServer {
    pub fn new(
        cfg: ServerConfig,
        levels: Arc<SharedLevels>,
        alert: Arc<AlertChannel>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self { cfg, levels, alert, store }
    }

    /// Bind the configured port and run until the stop flag flips.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.cfg.port)).await?;
        info!("aggregation server listening on port {}", self.cfg.port);
        self.serve(listener, stop).await;
        Ok(())
    }

    /// Event loop over an already-bound listener. Split from `run` so tests
    /// can bind an ephemeral port themselves.
    pub async fn serve(self, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        // A latch left over from a previous run would fire immediately.
        self.alert.clear();

        let mut clients: HashMap<SocketAddr, OwnedWriteHalf> = HashMap::new();
        let (closed_tx, mut closed_rx) = mpsc::channel::<SocketAddr>(16);

        let mut ingest = interval(INGEST_PERIOD);
        ingest.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First flush lands one full window after startup, not immediately.
        let mut flush = interval_at(Instant::now() + self.cfg.window, self.cfg.window);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut window = AggregationWindow::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("client connected: {addr}");
                        let (read_half, write_half) = stream.into_split();
                        clients.insert(addr, write_half);
                        tokio::spawn(watch_for_eof(read_half, addr, closed_tx.clone()));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                _ = self.alert.wait_for_alert() => {
                    self.handle_alert(&mut clients).await;
                }
                Some(addr) = closed_rx.recv() => {
                    if clients.remove(&addr).is_some() {
                        info!("client disconnected: {addr}");
                    }
                }
                _ = ingest.tick() => {
                    if let Some(value) = self.levels.display() {
                        window.add(value);
                    }
                }
                _ = flush.tick() => {
                    self.flush_window(&mut window).await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("aggregation server stopping, closing {} client(s)", clients.len());
        for (_, mut write_half) in clients {
            let _ = write_half.shutdown().await;
        }
    }

    /// Alert wake: persist, broadcast, hold the debounce, clear. The latch
    /// is re-checked first since a racing clear makes the wake spurious.
    async fn handle_alert(&self, clients: &mut HashMap<SocketAddr, OwnedWriteHalf>) {
        let Some(value) = self.alert.peek() else {
            self.alert.clear();
            return;
        };
        warn!("alert: loudness {value}");

        let record = PersistedRecord {
            device_id: self.cfg.device_id.clone(),
            value: i64::from(value),
            status: RecordStatus::Alert,
        };
        if let Err(e) = self.store.insert(&record).await {
            error!("alert record dropped: {e}");
        }

        // The text is the bare decimal value, no terminator.
        self.broadcast(value.to_string().as_bytes(), clients).await;

        sleep(self.cfg.debounce).await;
        self.alert.clear();
    }

    async fn broadcast(&self, payload: &[u8], clients: &mut HashMap<SocketAddr, OwnedWriteHalf>) {
        let mut dead = Vec::new();
        for (addr, write_half) in clients.iter_mut() {
            if let Err(e) = write_half.write_all(payload).await {
                warn!("broadcast to {addr} failed: {e}");
                dead.push(*addr);
            }
        }
        for addr in dead {
            clients.remove(&addr);
        }
        debug!(
            "broadcast {} byte(s) to {} client(s)",
            payload.len(),
            clients.len()
        );
    }

    /// Window boundary: persist the integer average, or nothing when the
    /// window saw no samples.
    async fn flush_window(&self, window: &mut AggregationWindow) {
        let snap = window.snapshot_reset();
        match snap.average() {
            Some(avg) => {
                info!("window closed: {} sample(s), average {avg}", snap.count);
                let record = PersistedRecord {
                    device_id: self.cfg.device_id.clone(),
                    value: avg,
                    status: RecordStatus::Normal,
                };
                if let Err(e) = self.store.insert(&record).await {
                    error!("window record dropped: {e}");
                }
            }
            None => info!("window closed: no data"),
        }
    }
}

/// Drain and discard inbound bytes until the peer closes or errors, then
/// report the address for deregistration.
async fn watch_for_eof(
    mut read_half: OwnedReadHalf,
    addr: SocketAddr,
    closed: mpsc::Sender<SocketAddr>,
) {
    let mut buf = [0u8; 256];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = closed.send(addr).await;
}
