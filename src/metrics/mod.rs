//! Feed statistics: counters for ticks, reconnects, and dropped frames

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time view of a client's counters
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStats {
    pub ticks_received: u64,
    pub reconnects: u64,
    pub malformed_frames: u64,
    pub ticks_per_second: f64,
}

/// Lock-free counters shared between a feed client's read path and whoever
/// renders status. Incremented on the hot path, so everything is an atomic.
#[derive(Debug)]
pub struct FeedMetrics {
    ticks: AtomicU64,
    reconnects: AtomicU64,
    malformed: AtomicU64,
    started: Instant,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks_received(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Average tick rate since the client was created
    pub fn ticks_per_second(&self) -> f64 {
        let elapsed = self.started.elapsed();
        if elapsed.as_secs() == 0 {
            return 0.0;
        }
        self.ticks_received() as f64 / elapsed.as_secs_f64()
    }

    pub fn snapshot(&self) -> FeedStats {
        FeedStats {
            ticks_received: self.ticks_received(),
            reconnects: self.reconnects(),
            malformed_frames: self.malformed_frames(),
            ticks_per_second: self.ticks_per_second(),
        }
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = FeedMetrics::new();
        metrics.record_tick();
        metrics.record_tick();
        metrics.record_reconnect();
        metrics.record_malformed();

        assert_eq!(metrics.ticks_received(), 2);
        assert_eq!(metrics.reconnects(), 1);
        assert_eq!(metrics.malformed_frames(), 1);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = FeedMetrics::new();
        for _ in 0..5 {
            metrics.record_tick();
        }

        let stats = metrics.snapshot();
        assert_eq!(stats.ticks_received, 5);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(stats.malformed_frames, 0);
    }

    #[test]
    fn test_rate_is_zero_in_first_second() {
        let metrics = FeedMetrics::new();
        metrics.record_tick();
        assert_eq!(metrics.ticks_per_second(), 0.0);
    }
}
