//! Cumulative ingestion counters
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

/// Monotonic counters, shared by every channel of a client. Never reset.
#[derive(Debug)]
pub struct IngestionStats {
    rows_sent: AtomicU64,
    batches_sent: AtomicU64,
    bytes_sent: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub rows_sent: u64,
    pub batches_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub elapsed: Duration,
    pub rows_per_second: f64,
}

impl IngestionStats {
    pub fn new() -> IngestionStats {
        IngestionStats {
            rows_sent: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_append(&self, rows: usize, bytes: usize) {
        self.rows_sent.fetch_add(rows as u64, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(self.started.elapsed())
    }

    fn snapshot_at(&self, elapsed: Duration) -> StatsSnapshot {
        let rows_sent = self.rows_sent.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        StatsSnapshot {
            rows_sent,
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed,
            rows_per_second: if secs > f64::EPSILON {
                rows_sent as f64 / secs
            } else {
                0.0
            },
        }
    }
}

impl Default for IngestionStats {
    fn default() -> Self {
        IngestionStats::new()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows in {} batches ({} bytes), {} errors, {:.2}s elapsed, {:.2} rows/s",
            self.rows_sent,
            self.batches_sent,
            self.bytes_sent,
            self.errors,
            self.elapsed.as_secs_f64(),
            self.rows_per_second
        )
    }
}
