// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters of one routing instance.
#[derive(Debug)]
pub struct RoutingStats {
    /// Payloads delivered to the builder.
    pub payloads_received: AtomicU64,

    /// Payloads matched to a mapping.
    pub payloads_identified: AtomicU64,

    /// Payloads dropped because nothing matched.
    pub payloads_unidentified: AtomicU64,

    /// Successful output writes.
    pub messages_dispatched: AtomicU64,

    /// Failed or unresolvable output writes.
    pub write_failures: AtomicU64,

    /// Fields dropped by a transformation failure.
    pub transform_failures: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl Default for RoutingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStats {
    pub fn new() -> Self {
        Self {
            payloads_received: AtomicU64::new(0),
            payloads_identified: AtomicU64::new(0),
            payloads_unidentified: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_identified(&self) {
        self.payloads_identified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unidentified(&self) {
        self.payloads_unidentified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RoutingStatsSnapshot {
        RoutingStatsSnapshot {
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            payloads_identified: self.payloads_identified.load(Ordering::Relaxed),
            payloads_unidentified: self.payloads_unidentified.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of routing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingStatsSnapshot {
    pub payloads_received: u64,
    pub payloads_identified: u64,
    pub payloads_unidentified: u64,
    pub messages_dispatched: u64,
    pub write_failures: u64,
    pub transform_failures: u64,
    pub uptime_secs: u64,
}

impl RoutingStatsSnapshot {
    /// Calculate payloads received per second.
    pub fn payloads_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.payloads_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Calculate messages dispatched per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_dispatched as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Sum of two snapshots (uptime is the larger one).
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            payloads_received: self.payloads_received + other.payloads_received,
            payloads_identified: self.payloads_identified + other.payloads_identified,
            payloads_unidentified: self.payloads_unidentified + other.payloads_unidentified,
            messages_dispatched: self.messages_dispatched + other.messages_dispatched,
            write_failures: self.write_failures + other.write_failures,
            transform_failures: self.transform_failures + other.transform_failures,
            uptime_secs: self.uptime_secs.max(other.uptime_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_stats() {
        let stats = RoutingStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_identified();
        stats.record_unidentified();
        stats.record_dispatched();
        stats.record_write_failure();
        stats.record_transform_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.payloads_received, 2);
        assert_eq!(snapshot.payloads_identified, 1);
        assert_eq!(snapshot.payloads_unidentified, 1);
        assert_eq!(snapshot.messages_dispatched, 1);
        assert_eq!(snapshot.write_failures, 1);
        assert_eq!(snapshot.transform_failures, 1);
    }

    #[test]
    fn test_rates_without_uptime() {
        let snapshot = RoutingStatsSnapshot {
            payloads_received: 10,
            ..Default::default()
        };
        assert_eq!(snapshot.payloads_per_second(), 0.0);

        let snapshot = RoutingStatsSnapshot {
            payloads_received: 10,
            messages_dispatched: 20,
            uptime_secs: 5,
            ..Default::default()
        };
        assert_eq!(snapshot.payloads_per_second(), 2.0);
        assert_eq!(snapshot.messages_per_second(), 4.0);
    }

    #[test]
    fn test_merge() {
        let a = RoutingStatsSnapshot {
            payloads_received: 1,
            uptime_secs: 3,
            ..Default::default()
        };
        let b = RoutingStatsSnapshot {
            payloads_received: 2,
            write_failures: 1,
            uptime_secs: 7,
            ..Default::default()
        };
        let total = a.merge(&b);
        assert_eq!(total.payloads_received, 3);
        assert_eq!(total.write_failures, 1);
        assert_eq!(total.uptime_secs, 7);
    }
}
