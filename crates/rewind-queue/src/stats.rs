//! Queue counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by producers and consumers
#[derive(Debug, Default)]
pub struct QueueStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
    health_checks: AtomicU64,
}

/// Point-in-time copy of [`QueueStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    /// Messages accepted by `submit`/`submit_batch`
    pub submitted: u64,
    /// Messages handled successfully
    pub delivered: u64,
    /// Redelivery attempts (deliveries, not messages)
    pub redelivered: u64,
    /// Messages given up on after their last attempt
    pub dead_lettered: u64,
    /// Successful health checks
    pub health_checks: u64,
}

impl QueueStats {
    pub(crate) fn record_submitted(&self, count: usize) {
        self.submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_redelivery(&self) {
        self.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_letter(&self, count: usize) {
        self.dead_lettered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_health_check(&self) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
        }
    }
}

impl QueueStatsSnapshot {
    /// Messages submitted but neither delivered nor dead-lettered yet
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.delivered)
            .saturating_sub(self.dead_lettered)
    }
}
