// src/state.rs  (shared loudness cell + calibration result)

use std::sync::Mutex;

/// Startup calibration result. Immutable once computed; the sampler owns
/// the calibration pass, the level mapper only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Quiescent sensor reading representing silence.
    pub baseline: i32,
    /// Usable spread above/below the baseline, scaled down for sensitivity.
    /// Always > 0.
    pub dynamic_range: i32,
}

#[derive(Debug, Default)]
struct LevelCell {
    /// Latest raw ADC code, published by the sampler.
    raw: Option<i32>,
    /// Display-oriented loudness (baseline + deviation), published by the
    /// level mapper. Larger always means louder.
    display: Option<i32>,
}

/// Latest-loudness cell shared between the sampler, the level mapper and
/// the aggregation server. One lock for the whole group; critical sections
/// are a single read or write and never span I/O.
#[derive(Debug, Default)]
pub struct SharedLevels {
    cell: Mutex<LevelCell>,
}

impl SharedLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_raw(&self, code: i32) {
        self.cell.lock().unwrap().raw = Some(code);
    }

    pub fn raw(&self) -> Option<i32> {
        self.cell.lock().unwrap().raw
    }

    pub fn publish_display(&self, value: i32) {
        self.cell.lock().unwrap().display = Some(value);
    }

    pub fn display(&self) -> Option<i32> {
        self.cell.lock().unwrap().display
    }

    /// Latest loudness as decimal text - the read-only sensor value
    /// endpoint. "0" until the first mapped cycle.
    pub fn latest_text(&self) -> String {
        self.display().unwrap_or(0).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_starts_empty() {
        let levels = SharedLevels::new();
        assert_eq!(levels.raw(), None);
        assert_eq!(levels.display(), None);
        assert_eq!(levels.latest_text(), "0");
    }

    #[test]
    fn test_publish_and_read_back() {
        let levels = SharedLevels::new();
        levels.publish_raw(1234);
        levels.publish_display(15000);
        assert_eq!(levels.raw(), Some(1234));
        assert_eq!(levels.display(), Some(15000));
        assert_eq!(levels.latest_text(), "15000");
    }

    #[test]
    fn test_display_independent_of_raw() {
        let levels = SharedLevels::new();
        levels.publish_raw(-5);
        assert_eq!(levels.display(), None);
        assert_eq!(levels.latest_text(), "0");
    }
}
