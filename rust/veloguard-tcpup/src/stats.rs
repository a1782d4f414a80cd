//! Statistics tracking for the translator
//!
//! Counters are relaxed atomics so a [`crate::translator::SharedTranslator`]
//! can hand them out without taking the table lock.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Translator-wide statistics
#[derive(Debug, Default)]
pub struct TranslatorStats {
    /// Start time
    start_time: Option<Instant>,

    // Egress: IP/TCP -> tunnel
    pub egress_packets: AtomicU64,
    pub egress_bytes: AtomicU64,

    // Ingress: tunnel -> IP/TCP
    pub ingress_packets: AtomicU64,
    pub ingress_bytes: AtomicU64,

    // Outcomes
    pub packets_dropped: AtomicU64,
    pub resets_required: AtomicU64,
    pub packets_malformed: AtomicU64,

    pub flows_created: AtomicU64,
}

impl TranslatorStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Record a translated egress packet (bytes written)
    pub fn record_egress(&self, bytes: usize) {
        self.egress_packets.fetch_add(1, Ordering::Relaxed);
        self.egress_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a translated ingress packet (bytes written)
    pub fn record_ingress(&self, bytes: usize) {
        self.ingress_packets.fetch_add(1, Ordering::Relaxed);
        self.ingress_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset_required(&self) {
        self.resets_required.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters; table-derived figures are supplied by the owner.
    pub fn snapshot(&self, flows_active: usize, flows_evicted: u64) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.uptime(),
            egress_packets: self.egress_packets.load(Ordering::Relaxed),
            egress_bytes: self.egress_bytes.load(Ordering::Relaxed),
            ingress_packets: self.ingress_packets.load(Ordering::Relaxed),
            ingress_bytes: self.ingress_bytes.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            resets_required: self.resets_required.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_active: flows_active as u64,
            flows_evicted,
        }
    }

    pub fn reset(&self) {
        self.egress_packets.store(0, Ordering::Relaxed);
        self.egress_bytes.store(0, Ordering::Relaxed);
        self.ingress_packets.store(0, Ordering::Relaxed);
        self.ingress_bytes.store(0, Ordering::Relaxed);
        self.packets_dropped.store(0, Ordering::Relaxed);
        self.resets_required.store(0, Ordering::Relaxed);
        self.packets_malformed.store(0, Ordering::Relaxed);
        self.flows_created.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of statistics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub egress_packets: u64,
    pub egress_bytes: u64,
    pub ingress_packets: u64,
    pub ingress_bytes: u64,
    pub packets_dropped: u64,
    pub resets_required: u64,
    pub packets_malformed: u64,
    pub flows_created: u64,
    pub flows_active: u64,
    pub flows_evicted: u64,
}

impl StatsSnapshot {
    /// Translated packets in both directions
    pub fn packets_translated(&self) -> u64 {
        self.egress_packets + self.ingress_packets
    }

    /// Egress bytes per second (requires two snapshots)
    pub fn egress_bytes_per_second(&self, previous: &StatsSnapshot, interval: Duration) -> f64 {
        let delta = self.egress_bytes.saturating_sub(previous.egress_bytes);
        delta as f64 / interval.as_secs_f64()
    }
}
