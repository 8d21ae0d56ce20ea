/*
 *  store.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Persistence of windowed averages and alert events. A single MySQL
 *  connection behind an async mutex; a dead connection is torn down and
 *  re-dialed once per insert before the write is declared failed.
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

use std::sync::Mutex;

use async_trait::async_trait;
use log::{info, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    /// No usable connection, even after a reconnect attempt.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    /// The connection was fine but the statement failed.
    #[error("database query failed: {0}")]
    Query(String),
}

/// Row status written alongside each measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Windowed average of routine readings.
    Normal,
    /// Loudness event that latched the alert.
    Alert,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Normal => "normal",
            RecordStatus::Alert => "alert",
        }
    }
}

/// One measurement row. The insert timestamp is the database's own
/// default, not carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub device_id: String,
    pub value: i64,
    pub status: RecordStatus,
}

/// Write side of the measurement store. The server only ever inserts;
/// queries belong to whatever reads the database.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PersistError>;
}

/// MySQL-backed store over one long-lived connection.
pub struct MySqlStore {
    opts: MySqlConnectOptions,
    conn: tokio::sync::Mutex<Option<MySqlConnection>>,
}

impl MySqlStore {
    /// Dial the database once up front so misconfiguration fails at
    /// startup, not at the first window boundary.
    pub async fn connect(opts: MySqlConnectOptions) -> Result<Self, PersistError> {
        let conn = opts
            .connect()
            .await
            .map_err(|e| PersistError::Unavailable(e.to_string()))?;
        info!("database connection established");
        Ok(Self {
            opts,
            conn: tokio::sync::Mutex::new(Some(conn)),
        })
    }

    /// Ensure the held connection answers a ping, re-dialing once if it
    /// does not. Holds the lock; callers pass the guard through.
    async fn revive(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<MySqlConnection>>,
    ) -> Result<(), PersistError> {
        let alive = match guard.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        };
        if alive {
            return Ok(());
        }

        if let Some(dead) = guard.take() {
            let _ = dead.close().await;
        }
        warn!("database connection lost, reconnecting");
        let conn = self
            .opts
            .connect()
            .await
            .map_err(|e| PersistError::Unavailable(e.to_string()))?;
        info!("database connection re-established");
        **guard = Some(conn);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MySqlStore {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PersistError> {
        let mut guard = self.conn.lock().await;
        self.revive(&mut guard).await?;

        let Some(conn) = guard.as_mut() else {
            return Err(PersistError::Unavailable("no connection".to_string()));
        };

        sqlx::query("INSERT INTO sensor_data (device_id, value, status) VALUES (?, ?, ?)")
            .bind(&record.device_id)
            .bind(record.value)
            .bind(record.status.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| PersistError::Query(e.to_string()))?;
        Ok(())
    }
}

/// In-memory store for tests and development without a database. Records
/// every insert and can inject failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
    fail_next: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Fail the next insert with `Unavailable`.
    pub fn fail_next_insert(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: &PersistedRecord) -> Result<(), PersistError> {
        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(PersistError::Unavailable("simulated outage".to_string()));
        }
        drop(fail);
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
