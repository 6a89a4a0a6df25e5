//! Bridge metrics for monitoring and observability.
//!
//! Counters for wrapper minting, lifecycle transitions, boundary crossings
//! and garbage collection, with a serializable snapshot and Prometheus export.

use crate::wrapper::WrapperKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Wrappers minted, by kind
    pub wrappers_minted: HashMap<WrapperKind, u64>,
    /// Wrappers that reached `Collected`
    pub wrappers_collected: u64,
    /// Transitions into `PendingRelease`
    pub pending_releases: u64,
    /// Transitions into `Resurrected`
    pub resurrections: u64,
    /// Guest-to-host calls
    pub host_calls: u64,
    /// Host-to-guest calls
    pub guest_calls: u64,
    /// Exceptions translated at a crossing
    pub exceptions_translated: u64,
    /// Identity tag cache hits
    pub identity_hits: u64,
    /// Identity lookups that fell back to a registry scan
    pub identity_misses: u64,
    /// Collector rounds run by the bridge
    pub gc_passes: u64,
    /// Finalizer events processed
    pub finalizers_run: u64,
    /// Finalizer events skipped as stale
    pub finalizers_skipped: u64,
    /// Flat table calls by function name
    pub native_calls: HashMap<String, u64>,
}

impl MetricsSnapshot {
    /// Total wrappers minted across kinds
    pub fn total_minted(&self) -> u64 {
        self.wrappers_minted.values().sum()
    }
}

/// Metrics collector owned by a bridge
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    wrappers_collected: AtomicU64,
    pending_releases: AtomicU64,
    resurrections: AtomicU64,
    host_calls: AtomicU64,
    guest_calls: AtomicU64,
    exceptions_translated: AtomicU64,
    identity_hits: AtomicU64,
    identity_misses: AtomicU64,
    gc_passes: AtomicU64,
    finalizers_run: AtomicU64,
    finalizers_skipped: AtomicU64,
    minted: parking_lot::Mutex<HashMap<WrapperKind, u64>>,
    native_calls: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a minted wrapper
    pub fn record_minted(&self, kind: WrapperKind) {
        *self.minted.lock().entry(kind).or_insert(0) += 1;
    }

    /// Record a wrapper reaching `Collected`
    pub fn record_collected(&self) {
        self.wrappers_collected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transition into `PendingRelease`
    pub fn record_pending_release(&self) {
        self.pending_releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resurrection
    pub fn record_resurrection(&self) {
        self.resurrections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a guest-to-host call
    pub fn record_host_call(&self) {
        self.host_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a host-to-guest call
    pub fn record_guest_call(&self) {
        self.guest_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a translated exception
    pub fn record_exception(&self) {
        self.exceptions_translated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an identity tag hit
    pub fn record_identity_hit(&self) {
        self.identity_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an identity lookup that needed a scan
    pub fn record_identity_miss(&self) {
        self.identity_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one collector round
    pub fn record_gc_pass(&self) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processed finalizer event
    pub fn record_finalizer(&self, stale: bool) {
        if stale {
            self.finalizers_skipped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.finalizers_run.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a flat table call
    pub fn record_native_call(&self, name: &str) {
        *self.native_calls.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            wrappers_minted: self.minted.lock().clone(),
            wrappers_collected: self.wrappers_collected.load(Ordering::Relaxed),
            pending_releases: self.pending_releases.load(Ordering::Relaxed),
            resurrections: self.resurrections.load(Ordering::Relaxed),
            host_calls: self.host_calls.load(Ordering::Relaxed),
            guest_calls: self.guest_calls.load(Ordering::Relaxed),
            exceptions_translated: self.exceptions_translated.load(Ordering::Relaxed),
            identity_hits: self.identity_hits.load(Ordering::Relaxed),
            identity_misses: self.identity_misses.load(Ordering::Relaxed),
            gc_passes: self.gc_passes.load(Ordering::Relaxed),
            finalizers_run: self.finalizers_run.load(Ordering::Relaxed),
            finalizers_skipped: self.finalizers_skipped.load(Ordering::Relaxed),
            native_calls: self.native_calls.lock().clone(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.wrappers_collected,
            &self.pending_releases,
            &self.resurrections,
            &self.host_calls,
            &self.guest_calls,
            &self.exceptions_translated,
            &self.identity_hits,
            &self.identity_misses,
            &self.gc_passes,
            &self.finalizers_run,
            &self.finalizers_skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.minted.lock().clear();
        self.native_calls.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP gcbridge_wrappers_minted_total Wrappers minted\n");
        output.push_str("# TYPE gcbridge_wrappers_minted_total counter\n");
        let mut minted: Vec<_> = snapshot.wrappers_minted.iter().collect();
        minted.sort_by_key(|(kind, _)| kind.to_string());
        for (kind, count) in minted {
            output.push_str(&format!(
                "gcbridge_wrappers_minted_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output.push_str("\n# HELP gcbridge_lifecycle_transitions_total Lifecycle transitions\n");
        output.push_str("# TYPE gcbridge_lifecycle_transitions_total counter\n");
        for (state, count) in [
            ("pending_release", snapshot.pending_releases),
            ("resurrected", snapshot.resurrections),
            ("collected", snapshot.wrappers_collected),
        ] {
            output.push_str(&format!(
                "gcbridge_lifecycle_transitions_total{{state=\"{}\"}} {}\n",
                state, count
            ));
        }

        output.push_str("\n# HELP gcbridge_crossings_total Cross-runtime calls\n");
        output.push_str("# TYPE gcbridge_crossings_total counter\n");
        output.push_str(&format!(
            "gcbridge_crossings_total{{direction=\"guest_to_host\"}} {}\n",
            snapshot.host_calls
        ));
        output.push_str(&format!(
            "gcbridge_crossings_total{{direction=\"host_to_guest\"}} {}\n",
            snapshot.guest_calls
        ));

        output.push_str("\n# HELP gcbridge_exceptions_total Exceptions translated at a crossing\n");
        output.push_str("# TYPE gcbridge_exceptions_total counter\n");
        output.push_str(&format!(
            "gcbridge_exceptions_total {}\n",
            snapshot.exceptions_translated
        ));

        output.push_str("\n# HELP gcbridge_gc_passes_total Collector rounds\n");
        output.push_str("# TYPE gcbridge_gc_passes_total counter\n");
        output.push_str(&format!("gcbridge_gc_passes_total {}\n", snapshot.gc_passes));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_default() {
        let metrics = BridgeMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_minted(), 0);
        assert!(snapshot.native_calls.is_empty());
    }

    #[test]
    fn test_minted_per_kind() {
        let metrics = BridgeMetrics::new();
        metrics.record_minted(WrapperKind::HostProxy);
        metrics.record_minted(WrapperKind::HostProxy);
        metrics.record_minted(WrapperKind::Context);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.wrappers_minted[&WrapperKind::HostProxy], 2);
        assert_eq!(snapshot.total_minted(), 3);
    }

    #[test]
    fn test_finalizer_counts() {
        let metrics = BridgeMetrics::new();
        metrics.record_finalizer(false);
        metrics.record_finalizer(true);
        metrics.record_finalizer(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.finalizers_run, 2);
        assert_eq!(snapshot.finalizers_skipped, 1);
    }

    #[test]
    fn test_reset() {
        let metrics = BridgeMetrics::new();
        metrics.record_native_call("pid");
        metrics.record_resurrection();
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = BridgeMetrics::new();
        metrics.record_minted(WrapperKind::Sandbox);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("wrappersMinted"));
        assert!(json.contains("\"sandbox\""));
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = BridgeMetrics::new();
        metrics.record_minted(WrapperKind::GuestCache);
        metrics.record_host_call();

        let output = metrics.to_prometheus();
        assert!(output.contains("gcbridge_wrappers_minted_total{kind=\"guest_cache\"} 1"));
        assert!(output.contains("direction=\"guest_to_host\"} 1"));
    }
}
