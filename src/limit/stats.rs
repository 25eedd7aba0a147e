//! Sliding-window averages of observed delays.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Averages nanosecond delay samples over a fixed trailing window.
///
/// Samples are timestamped at insertion and kept in order; anything older
/// than the window is dropped lazily on `add` and unconditionally on
/// `average`.
pub struct DelayStats {
    window: Duration,
    inner: Mutex<Ring>,
}

struct Ring {
    last_purge: Instant,
    /// Samples in insertion order; timestamps are weakly monotone.
    entries: VecDeque<(Instant, i64)>,
}

impl DelayStats {
    /// Creates an empty ring covering the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Ring {
                last_purge: Instant::now(),
                entries: VecDeque::new(),
            }),
        }
    }

    /// Records a sample at the current time, purging stale entries when the
    /// last purge is older than the window.
    pub fn add(&self, value_ns: i64) {
        let now = Instant::now();
        let mut ring = self.inner.lock().unwrap();

        ring.entries.push_back((now, value_ns));

        if now.duration_since(ring.last_purge) > self.window {
            self.purge(&mut ring, now);
        }
    }

    /// Mean of the samples recorded within the window, in nanoseconds;
    /// 0.0 when empty.
    pub fn average(&self) -> f64 {
        let now = Instant::now();
        let mut ring = self.inner.lock().unwrap();

        self.purge(&mut ring, now);

        if ring.entries.is_empty() {
            return 0.0;
        }

        // i128 keeps the sum exact for any realistic number of i64 samples.
        let sum: i128 = ring.entries.iter().map(|&(_, v)| v as i128).sum();
        sum as f64 / ring.entries.len() as f64
    }

    /// Drops every entry older than the window, preserving order.
    fn purge(&self, ring: &mut Ring, now: Instant) {
        ring.last_purge = now;

        match ring
            .entries
            .iter()
            .position(|&(t, _)| now.duration_since(t) <= self.window)
        {
            Some(first_valid) => {
                ring.entries.drain(..first_valid);
            }
            None => ring.entries.clear(),
        }
    }
}
