/*
 *  level.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Maps the calibrated deviation from baseline onto the 8-segment bar,
 *  suppresses flicker with a held floor level, and latches the alert when
 *  loudness crosses the threshold.
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

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::alert::AlertChannel;
use crate::state::{Calibration, SharedLevels};
use crate::ws2812::{LedFrame, LedTransport, Rgb, Ws2812Encoder, LED_COUNT};

/// Segments at/above this index render red; a level beyond it latches the
/// alert.
pub const ALERT_LEVEL: u8 = 4;

/// Poll interval of the mapping loop. Deliberate low-priority busy-poll.
pub const POLL_DELAY: Duration = Duration::from_micros(300);

/// Extra pause after a cycle that saw an unchanged raw value, so a stale
/// reading is not re-processed back-to-back.
pub const UNCHANGED_PAUSE: Duration = Duration::from_millis(200);

/// Bounded display level with the anti-flicker floor: a computed zero
/// reuses the last nonzero level so the bar never goes fully dark mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelState {
    pub current_level: u8,
    pub held_level: u8,
}

impl Default for LevelState {
    fn default() -> Self {
        // One segment stays lit from the start.
        Self { current_level: 0, held_level: 1 }
    }
}

impl LevelState {
    /// Apply a freshly computed level, returning the level to display.
    pub fn apply(&mut self, level: u8) -> u8 {
        let shown = if level == 0 { self.held_level } else { level };
        if level != 0 {
            self.held_level = level;
        }
        self.current_level = shown;
        shown
    }
}

/// Scale the absolute deviation into `0..=LED_COUNT-1`.
pub fn level_for(deviation: i32, dynamic_range: i32) -> u8 {
    let scaled = deviation.saturating_mul(LED_COUNT as i32) / dynamic_range.max(1);
    scaled.clamp(0, (LED_COUNT - 1) as i32) as u8
}

/// Build the frame for a display level: segments `0..=level` lit, green
/// below the alert threshold, red at/above it, the rest dark.
pub fn build_frame(level: u8) -> LedFrame {
    let mut frame = LedFrame::dark();
    for i in 0..LED_COUNT {
        if i < (level as usize) + 1 {
            let color = if (i as u8) < ALERT_LEVEL { Rgb::GREEN } else { Rgb::RED };
            frame.set(i, color);
        }
    }
    frame
}

pub struct LevelMapper<T: LedTransport> {
    levels: Arc<SharedLevels>,
    alert: Arc<AlertChannel>,
    encoder: Ws2812Encoder<T>,
    cal: Calibration,
    state: LevelState,
    last_raw: Option<i32>,
}

impl<T: LedTransport> LevelMapper<T> {
    pub fn new(
        levels: Arc<SharedLevels>,
        alert: Arc<AlertChannel>,
        encoder: Ws2812Encoder<T>,
        cal: Calibration,
    ) -> Self {
        Self {
            levels,
            alert,
            encoder,
            cal,
            state: LevelState::default(),
            last_raw: None,
        }
    }

    /// Continuous mapping loop. Transmit failures drop the frame; the next
    /// cycle rebuilds it from fresh data.
    pub async fn run(mut self, stop: watch::Receiver<bool>) {
        info!("level mapper started");
        while !*stop.borrow() {
            sleep(POLL_DELAY).await;

            let Some(raw) = self.levels.raw() else {
                continue;
            };
            if self.last_raw == Some(raw) {
                sleep(UNCHANGED_PAUSE).await;
                continue;
            }
            self.last_raw = Some(raw);

            let level = self.map_cycle(raw);
            if let Err(e) = self.encoder.encode_and_send(&build_frame(level)) {
                warn!("frame dropped: {e}");
            }
        }
        info!("level mapper stopped");
    }

    /// One mapping cycle on a fresh raw code: compute the display level,
    /// latch the alert past the threshold, publish the display-oriented
    /// loudness. Returns the level to render.
    fn map_cycle(&mut self, raw: i32) -> u8 {
        let deviation = (raw - self.cal.baseline).abs();
        let level = self.state.apply(level_for(deviation, self.cal.dynamic_range));

        if level > ALERT_LEVEL {
            self.alert.set(raw);
        }

        // Downstream consumers want larger = louder, anchored above the
        // baseline.
        let display = self.cal.baseline + deviation;
        self.levels.publish_display(display);

        debug!(
            "meter: value {display} baseline {} range {} -> {} segment(s)",
            self.cal.baseline,
            self.cal.dynamic_range,
            level + 1
        );
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws2812::MockTransport;

    fn mapper_with(cal: Calibration) -> (LevelMapper<MockTransport>, Arc<SharedLevels>, Arc<AlertChannel>) {
        let levels = Arc::new(SharedLevels::new());
        let alert = Arc::new(AlertChannel::new());
        let encoder = Ws2812Encoder::new(MockTransport::new());
        let mapper = LevelMapper::new(levels.clone(), alert.clone(), encoder, cal);
        (mapper, levels, alert)
    }

    const CAL: Calibration = Calibration { baseline: 16000, dynamic_range: 2000 };

    #[test]
    fn test_level_always_in_range() {
        for deviation in [0, 1, 250, 1999, 2000, 16_000, i32::MAX / LED_COUNT as i32] {
            let level = level_for(deviation, 2000);
            assert!(level <= (LED_COUNT - 1) as u8, "deviation {deviation} -> {level}");
        }
        // Degenerate range must not panic or overflow the bound.
        assert!(level_for(12345, 0) <= 7);
        assert!(level_for(12345, 1) <= 7);
    }

    #[test]
    fn test_level_scaling() {
        // deviation * 8 / range
        assert_eq!(level_for(0, 2000), 0);
        assert_eq!(level_for(249, 2000), 0);
        assert_eq!(level_for(250, 2000), 1);
        assert_eq!(level_for(1000, 2000), 4);
        assert_eq!(level_for(1750, 2000), 7);
        assert_eq!(level_for(9999, 2000), 7);
    }

    #[test]
    fn test_held_level_suppresses_flicker() {
        let mut state = LevelState::default();
        assert_eq!(state.apply(5), 5);
        // A momentary zero reuses the held level; the bar never goes dark.
        assert_eq!(state.apply(0), 5);
        assert_eq!(state.held_level, 5);
        // A nonzero level replaces the hold.
        assert_eq!(state.apply(2), 2);
        assert_eq!(state.apply(0), 2);
    }

    #[test]
    fn test_initial_hold_is_one_segment() {
        let mut state = LevelState::default();
        assert_eq!(state.apply(0), 1);
    }

    #[test]
    fn test_frame_colors_split_at_threshold() {
        let frame = build_frame(5);
        // Segments 0..=5 lit: 0..4 green, 4..=5 red, 6..8 dark.
        for i in 0..4 {
            assert_eq!(frame.get(i), Some(Rgb::GREEN), "segment {i}");
        }
        for i in 4..6 {
            assert_eq!(frame.get(i), Some(Rgb::RED), "segment {i}");
        }
        for i in 6..LED_COUNT {
            assert_eq!(frame.get(i), Some(Rgb::OFF), "segment {i}");
        }
    }

    #[test]
    fn test_frame_level_zero_single_green() {
        let frame = build_frame(0);
        assert_eq!(frame.get(0), Some(Rgb::GREEN));
        for i in 1..LED_COUNT {
            assert_eq!(frame.get(i), Some(Rgb::OFF));
        }
    }

    #[test]
    fn test_alert_latched_above_threshold() {
        let (mut mapper, _levels, alert) = mapper_with(CAL);

        // deviation 1250 -> level 5 > 4: latch with the raw code.
        let level = mapper.map_cycle(16000 + 1250);
        assert_eq!(level, 5);
        assert_eq!(alert.peek(), Some(17250));

        // A later quiet cycle leaves the latch alone.
        mapper.map_cycle(16000 + 100);
        assert_eq!(alert.peek(), Some(17250));

        alert.clear();
        assert_eq!(alert.peek(), None);
    }

    #[test]
    fn test_no_alert_at_threshold() {
        let (mut mapper, _levels, alert) = mapper_with(CAL);
        // deviation 1000 -> level exactly 4: not an alert.
        mapper.map_cycle(16000 + 1000);
        assert_eq!(alert.peek(), None);
    }

    #[test]
    fn test_display_value_is_baseline_plus_deviation() {
        let (mut mapper, levels, _alert) = mapper_with(CAL);

        // Deviation below the baseline still displays as louder.
        mapper.map_cycle(16000 - 600);
        assert_eq!(levels.display(), Some(16600));

        mapper.map_cycle(16000 + 600);
        assert_eq!(levels.display(), Some(16600));
    }
}
