/*
 *  alert.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Single-slot alert latch with blocking-wait semantics. The level mapper
 *  latches a triggering value and wakes waiters; the aggregation server
 *  waits, reads, and explicitly clears.
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

use log::debug;
use thiserror::Error;
use tokio::sync::Notify;

/// Malformed input on the alert command surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid alert command: {0:?} (only \"clear\" is accepted)")]
    InvalidCommand(String),
}

#[derive(Debug, Default)]
struct AlertSlot {
    value: i32,
    active: bool,
}

/// Idle -> Latched on `set`, back to Idle only through an explicit `clear`.
/// Never times out; a waiter is released by a new alert or by nothing.
#[derive(Debug, Default)]
pub struct AlertChannel {
    slot: Mutex<AlertSlot>,
    notify: Notify,
}

impl AlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `value` and wake everyone blocked in `wait_for_alert`.
    pub fn set(&self, value: i32) {
        {
            let mut slot = self.slot.lock().unwrap();
            slot.value = value;
            slot.active = true;
        }
        self.notify.notify_waiters();
    }

    /// Non-blocking read of the current value; 0 when idle.
    pub fn read(&self) -> i32 {
        self.slot.lock().unwrap().value
    }

    /// Non-blocking peek: the latched value, or `None` when idle.
    pub fn peek(&self) -> Option<i32> {
        let slot = self.slot.lock().unwrap();
        slot.active.then_some(slot.value)
    }

    /// Idempotent reset to Idle. Also wakes waiters so pollers re-evaluate.
    pub fn clear(&self) {
        {
            let mut slot = self.slot.lock().unwrap();
            slot.value = 0;
            slot.active = false;
        }
        self.notify.notify_waiters();
        debug!("alert latch cleared");
    }

    /// Suspend until the latch is active, then return the latched value.
    /// Wake-on-write; no polling, no timeout.
    pub async fn wait_for_alert(&self) -> i32 {
        loop {
            // Register interest before checking, so a set() racing this
            // check cannot be missed.
            let notified = self.notify.notified();
            if let Some(value) = self.peek() {
                return value;
            }
            notified.await;
        }
    }

    /// Latched value as decimal text; "0" when idle.
    pub fn read_text(&self) -> String {
        self.read().to_string()
    }

    /// Command surface of the alert endpoint: the literal `clear`
    /// (surrounding whitespace tolerated) succeeds, anything else is
    /// rejected.
    pub fn apply_command(&self, input: &str) -> Result<(), ProtocolError> {
        let cmd = input.trim();
        if cmd == "clear" {
            self.clear();
            Ok(())
        } else {
            Err(ProtocolError::InvalidCommand(cmd.to_string()))
        }
    }
}
