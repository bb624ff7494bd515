//! Progress tracking for batch embedding runs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Live counters for one batch invocation
///
/// Updated by the processor as sub-batches complete; any other task may read
/// it concurrently through [`BatchProgress::snapshot`].
#[derive(Debug)]
pub struct BatchProgress {
    total: AtomicUsize,
    processed: AtomicUsize,
    cached: AtomicUsize,
    generated: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    start_time: DateTime<Utc>,
    started: Instant,
}

/// Point-in-time copy of [`BatchProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub cached: usize,
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub start_time: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ProgressSnapshot {
    /// Completed fraction in [0, 1]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            processed: AtomicUsize::new(0),
            cached: AtomicUsize::new(0),
            generated: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn reset_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_cached(&self, n: usize) {
        self.cached.fetch_add(n, Ordering::Relaxed);
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_generated(&self, n: usize) {
        self.generated.fetch_add(n, Ordering::Relaxed);
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_failed(&self, n: usize) {
        self.failed.fetch_add(n, Ordering::Relaxed);
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped(&self, n: usize) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            start_time: self.start_time,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
