//! Wall-clock throttled progress logging for long value-table loops.

use std::time::{Duration, Instant};

use tracing::info;

pub struct Progress {
    label: String,
    total: usize,
    done: usize,
    interval: Duration,
    last: Instant,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: usize, interval: Duration) -> Self {
        Self {
            label: label.into(),
            total,
            done: 0,
            interval,
            last: Instant::now(),
        }
    }

    /// Count one item; log "n of m" if the interval has elapsed.
    pub fn step(&mut self, item: &str) {
        self.done += 1;
        if self.last.elapsed() >= self.interval {
            info!(label = %self.label, item, "{} of {}", self.done, self.total);
            self.last = Instant::now();
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }
}
