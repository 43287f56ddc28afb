//! Progress reporting for eviction runs
//!
//! Totals passed to [`ProgressSink::report_total`] are snapshots taken before
//! the sweep starts; the amount actually processed may differ.

use crate::types::EvictionStats;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Receives progress updates from a running strategy
pub trait ProgressSink: Send + Sync {
    fn report_total(&self, total: u64);

    fn advance(&self, step: u64);

    fn report_final(&self, stats: &EvictionStats);
}

/// Discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report_total(&self, _total: u64) {}

    fn advance(&self, _step: u64) {}

    fn report_final(&self, _stats: &EvictionStats) {}
}

/// Logs progress through `tracing`
pub struct LogProgress {
    store: String,
    total: AtomicU64,
    processed: AtomicU64,
    /// Log a progress line every time this many more units are processed
    log_every: u64,
    next_log_at: AtomicU64,
}

impl LogProgress {
    pub fn new(store: impl Into<String>) -> Self {
        Self::with_interval(store, 1000)
    }

    pub fn with_interval(store: impl Into<String>, log_every: u64) -> Self {
        let log_every = log_every.max(1);
        Self {
            store: store.into(),
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            log_every,
            next_log_at: AtomicU64::new(log_every),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn report_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        info!(store = %self.store, total, "Found candidates; processing...");
    }

    fn advance(&self, step: u64) {
        let processed = self.processed.fetch_add(step, Ordering::Relaxed) + step;
        let next = self.next_log_at.load(Ordering::Relaxed);
        if processed >= next {
            self.next_log_at
                .store(processed + self.log_every, Ordering::Relaxed);
            info!(
                store = %self.store,
                processed,
                total = self.total.load(Ordering::Relaxed),
                "Eviction progress"
            );
        }
    }

    fn report_final(&self, stats: &EvictionStats) {
        info!(
            store = %self.store,
            removed = stats.removed_count,
            reclaimed_bytes = stats.reclaimed_bytes,
            removed_directories = stats.removed_directories,
            skipped = stats.skipped,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            "Eviction finished"
        );
    }
}
