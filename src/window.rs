// src/window.rs  (fixed-duration averaging window for persistence)

/// Running sum/count of loudness samples over one persistence window.
/// Pure accumulation; the server owns the clock and calls `snapshot_reset`
/// at each window boundary.
#[derive(Debug, Default)]
pub struct AggregationWindow {
    sum: i64,
    count: u32,
}

/// Window totals at a boundary, detached from the live accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub sum: i64,
    pub count: u32,
}

impl WindowSnapshot {
    /// Integer average of the window, `None` when no samples arrived.
    pub fn average(&self) -> Option<i64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / i64::from(self.count))
        }
    }
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: i32) {
        self.sum += i64::from(value);
        self.count += 1;
    }

    /// Close the current window: hand back its totals and start the next
    /// one empty.
    pub fn snapshot_reset(&mut self) -> WindowSnapshot {
        let snap = WindowSnapshot { sum: self.sum, count: self.count };
        self.sum = 0;
        self.count = 0;
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_average() {
        let mut window = AggregationWindow::new();
        let snap = window.snapshot_reset();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.average(), None);
    }

    #[test]
    fn test_average_of_samples() {
        let mut window = AggregationWindow::new();
        for v in [10, 20, 30] {
            window.add(v);
        }
        let snap = window.snapshot_reset();
        assert_eq!(snap, WindowSnapshot { sum: 60, count: 3 });
        assert_eq!(snap.average(), Some(20));
    }

    #[test]
    fn test_snapshot_resets_accumulator() {
        let mut window = AggregationWindow::new();
        window.add(100);
        assert_eq!(window.snapshot_reset().average(), Some(100));

        // Next window starts from scratch.
        window.add(4);
        window.add(6);
        assert_eq!(window.snapshot_reset().average(), Some(5));
    }

    #[test]
    fn test_large_sums_do_not_overflow() {
        let mut window = AggregationWindow::new();
        // Many full-scale readings; i64 sum carries this easily.
        for _ in 0..1_000_000 {
            window.add(i32::MAX);
        }
        let snap = window.snapshot_reset();
        assert_eq!(snap.average(), Some(i64::from(i32::MAX)));
    }
}
