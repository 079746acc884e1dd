//! Metrics collector (C9, §4.9): a point-in-time snapshot of per-target and
//! per-endpoint counters, assembled on demand rather than pushed anywhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use config::ListenerProtocol;
use dashmap::DashMap;

/// Milliseconds since the Unix epoch; mirrors `registry::now_millis` but
/// kept local so this crate doesn't need a dependency on the connection
/// registry for one timestamp helper.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-target `lastActivity` tracking, keyed by `"ip:targetPort"` (§4.9).
///
/// Connection and request counters already live on `balancer::Target`
/// itself; this table only adds the one field the balancer crate has no
/// reason to track on its own.
#[derive(Default)]
pub struct ActivityTable {
    last_activity: DashMap<String, AtomicU64>,
}

impl ActivityTable {
    /// Builds an empty table.
    #[must_use]
    pub fn new() -> Self {
        ActivityTable::default()
    }

    /// Marks `target_label` as active at the current time.
    pub fn touch(&self, target_label: &str) {
        let now = now_millis();
        self.last_activity
            .entry(target_label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(now, Ordering::Relaxed);
    }

    /// The last recorded activity time for `target_label`, or `0` if never touched.
    #[must_use]
    pub fn last_activity(&self, target_label: &str) -> u64 {
        self.last_activity
            .get(target_label)
            .map(|entry| entry.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// One target's load-balancing counters plus last-activity timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetMetrics {
    /// `"ip:targetPort"` label identifying the backend.
    pub target: String,
    /// Connections currently open to this target.
    pub active: u32,
    /// Total requests/connections ever routed to this target.
    pub total: u64,
    /// Milliseconds since the Unix epoch of the last activity, `0` if none.
    pub last_activity_millis: u64,
}

/// One endpoint's listener status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointStatus {
    /// Port the endpoint's front listener binds.
    pub listen_port: u16,
    /// Protocol the front listener speaks.
    pub protocol: ListenerProtocol,
    /// Whether the listener is currently accepting connections.
    pub is_active: bool,
}

/// A full metrics snapshot (§4.9): global active-connection sum, per-target
/// detail, per-endpoint status. Consistent per record, not globally atomic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Sum of `active` across every target in every endpoint.
    pub total_active_connections: u64,
    /// Per-target metrics across all endpoints.
    pub targets: Vec<TargetMetrics>,
    /// Per-endpoint listener status.
    pub endpoints: Vec<EndpointStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_table_reports_zero_before_any_touch() {
        let table = ActivityTable::new();
        assert_eq!(table.last_activity("10.0.0.1:9090"), 0);
    }

    #[test]
    fn touch_advances_the_recorded_timestamp() {
        let table = ActivityTable::new();
        table.touch("10.0.0.1:9090");
        assert!(table.last_activity("10.0.0.1:9090") > 0);
    }
}
