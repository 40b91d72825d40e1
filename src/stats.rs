//! Delivery statistics for the running agent.
//!
//! Counters are in memory only and reset with the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one agent process.
#[derive(Debug)]
pub struct DeliveryStats {
    ticks_completed: AtomicU64,
    ticks_failed: AtomicU64,
    records_delivered: AtomicU64,
    batches_delivered: AtomicU64,
    reauthentications: AtomicU64,
    started_at: DateTime<Utc>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            ticks_completed: AtomicU64::new(0),
            ticks_failed: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            reauthentications: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_tick_completed(&self) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_failed(&self) {
        self.ticks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one delivered batch of `records` records.
    pub fn record_batch_delivered(&self, records: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_reauthentication(&self) {
        self.reauthentications.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            reauthentications: self.reauthentications.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Ticks completed: {}\n\
             - Ticks failed: {}\n\
             - Records delivered: {}\n\
             - Batches delivered: {}\n\
             - Re-authentications: {}\n\
             - Uptime: {} seconds",
            stats.ticks_completed,
            stats.ticks_failed,
            stats.records_delivered,
            stats.batches_delivered,
            stats.reauthentications,
            stats.uptime_secs
        )
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub records_delivered: u64,
    pub batches_delivered: u64,
    pub reauthentications: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<DeliveryStats>;
