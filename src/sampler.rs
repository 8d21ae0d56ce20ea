/*
 *  sampler.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Adaptive sampling and startup calibration. Triggers single-shot
 *  conversions on the sensing ADC, derives a quiescent baseline and a
 *  scaled dynamic range, then publishes raw codes at a fixed cadence.
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

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::state::{Calibration, SharedLevels};

/// Maximum representable magnitude of the 16-bit converter.
pub const MAX_CODE: i32 = 32_767;

/// Conversions averaged into the baseline at startup.
pub const CALIBRATION_ROUNDS: u32 = 100;

/// Retries per calibration slot before giving up. The slot is re-sampled
/// when the converter returns a non-positive code.
const SLOT_RETRIES: u32 = 3;

/// Conversion settle time after a trigger.
pub const SETTLE_DELAY: Duration = Duration::from_millis(15);

/// Idle pause between steady-state sampling cycles. Best-effort
/// periodicity, not a hard deadline.
pub const IDLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SamplerError {
    /// I/O failure on the sensing bus.
    #[error("sensor bus error: {0}")]
    Peripheral(String),
    /// Non-positive code where a positive one is required.
    #[error("invalid sensor reading: {0}")]
    InvalidReading(i32),
    /// A calibration slot kept reading non-positive codes.
    #[error("calibration failed at round {round}: persistent non-positive readings")]
    CalibrationFailed { round: u32 },
}

/// Single-shot conversion interface of the sensing peripheral. The sampler
/// owns the settle timing; implementations just move bytes on the bus.
pub trait SoundAdc: Send {
    /// Kick off one conversion.
    fn begin_conversion(&mut self) -> Result<(), SamplerError>;
    /// Read back the signed 16-bit result of the last conversion.
    fn read_code(&mut self) -> Result<i16, SamplerError>;
}

pub struct Sampler<A: SoundAdc> {
    adc: A,
    levels: Arc<SharedLevels>,
}

impl<A: SoundAdc> Sampler<A> {
    pub fn new(adc: A, levels: Arc<SharedLevels>) -> Self {
        Self { adc, levels }
    }

    /// One-time startup calibration: average `CALIBRATION_ROUNDS` settled
    /// conversions into the baseline, then derive the dynamic range as the
    /// smaller headroom side scaled to one-eighth. Non-positive readings
    /// retry the slot up to a bound instead of spinning forever.
    pub async fn calibrate(&mut self) -> Result<Calibration, SamplerError> {
        let mut sum: i64 = 0;

        for round in 0..CALIBRATION_ROUNDS {
            let mut accepted: Option<i32> = None;

            for _ in 0..=SLOT_RETRIES {
                self.adc.begin_conversion()?;
                sleep(SETTLE_DELAY).await;
                let code = i32::from(self.adc.read_code()?);
                if code > 0 {
                    accepted = Some(code);
                    break;
                }
                warn!("calibration round {round}: discarded non-positive code {code}");
            }

            let code = accepted.ok_or(SamplerError::CalibrationFailed { round })?;
            sum += i64::from(code);
            sleep(SETTLE_DELAY).await;
        }

        let baseline = (sum / i64::from(CALIBRATION_ROUNDS)) as i32;
        // Headroom is whichever side of the baseline is smaller; >>3
        // compresses sensitivity. Floor at 1 so the mapper never divides
        // by zero.
        let span = (MAX_CODE - baseline).min(baseline);
        let dynamic_range = (span >> 3).max(1);

        info!("calibrated: baseline {baseline}, dynamic range {dynamic_range}");
        Ok(Calibration { baseline, dynamic_range })
    }

    /// Steady-state loop: trigger, settle, read, publish. A failed cycle
    /// logs and contributes nothing; the next cycle proceeds independently.
    pub async fn run(mut self, stop: watch::Receiver<bool>) {
        info!("sampler started");
        while !*stop.borrow() {
            if let Err(e) = self.cycle().await {
                warn!("sampler cycle skipped: {e}");
            }
            sleep(IDLE_DELAY).await;
        }
        info!("sampler stopped");
    }

    async fn cycle(&mut self) -> Result<(), SamplerError> {
        self.adc.begin_conversion()?;
        sleep(SETTLE_DELAY).await;

        let code = i32::from(self.adc.read_code()?);
        if code < 0 {
            return Err(SamplerError::InvalidReading(code));
        }
        self.levels.publish_raw(code);
        Ok(())
    }
}

/// Shared inspection/scripting state for [`MockAdc`].
#[derive(Debug, Default)]
pub struct MockAdcState {
    /// Codes returned in order; the last one repeats once exhausted.
    pub codes: Vec<i16>,
    /// Read cursor into `codes`.
    pub cursor: usize,
    /// Conversions triggered so far.
    pub conversions: usize,
    /// Fail the next bus operation.
    pub simulate_bus_failure: bool,
}

/// Scripted converter for tests and development without the sensor board.
#[derive(Debug, Clone, Default)]
pub struct MockAdc {
    state: Arc<Mutex<MockAdcState>>,
}

impl MockAdc {
    /// A converter that replays `codes`, repeating the final one.
    pub fn with_codes(codes: Vec<i16>) -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().codes = codes;
        mock
    }

    pub fn state(&self) -> Arc<Mutex<MockAdcState>> {
        Arc::clone(&self.state)
    }
}

impl SoundAdc for MockAdc {
    fn begin_conversion(&mut self) -> Result<(), SamplerError> {
        let mut state = self.state.lock().unwrap();
        if state.simulate_bus_failure {
            state.simulate_bus_failure = false;
            return Err(SamplerError::Peripheral("simulated bus failure".to_string()));
        }
        state.conversions += 1;
        Ok(())
    }

    fn read_code(&mut self) -> Result<i16, SamplerError> {
        let mut state = self.state.lock().unwrap();
        if state.codes.is_empty() {
            return Err(SamplerError::Peripheral("no scripted codes".to_string()));
        }
        let idx = state.cursor.min(state.codes.len() - 1);
        let code = state.codes[idx];
        state.cursor += 1;
        Ok(code)
    }
}
