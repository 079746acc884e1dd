use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// EWMA smoothing weights for response-time tracking (§4.7): `0.8` for the
/// prior average, `0.2` for the new sample.
const EWMA_OLD_WEIGHT: f64 = 0.8;
const EWMA_NEW_WEIGHT: f64 = 0.2;

/// Backend protocol a target speaks, independent of the listener's own
/// protocol (an HTTP endpoint may still forward over a TLS-wrapped
/// backend connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendProtocol {
    /// Plain TCP to the backend.
    Tcp,
    /// TLS-wrapped TCP to the backend.
    SslTcp,
    /// Connectionless UDP to the backend.
    Udp,
}

/// Static description of one backend server (§3 "Target server").
#[derive(Clone, Debug)]
pub struct TargetConfig {
    /// Backend IP or hostname.
    pub ip: String,
    /// Port the listener accepts connections on.
    pub port: u16,
    /// Port the backend process actually listens on.
    pub target_port: u16,
    /// Zone label used by the zone-affinity strategy.
    pub zone: String,
    /// Weighted round-robin weight; defaults to 5.
    pub weight: u32,
    /// Protocol spoken to this backend.
    pub backend_protocol: BackendProtocol,
    /// Client certificate thumbprint this target presents, if mutual TLS applies.
    pub client_certificate: Option<String>,
}

impl TargetConfig {
    /// Builds a target with the default weight of 5 and no client certificate.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16, target_port: u16, zone: impl Into<String>) -> Self {
        TargetConfig {
            ip: ip.into(),
            port,
            target_port,
            zone: zone.into(),
            weight: 5,
            backend_protocol: BackendProtocol::Tcp,
            client_certificate: None,
        }
    }
}

/// A live backend target: its static [`TargetConfig`] plus the mutable
/// health and load counters every strategy reads.
#[derive(Debug)]
pub struct Target {
    /// Static configuration this target was built from.
    pub config: TargetConfig,
    current_connections: AtomicU32,
    average_response_time_millis_bits: AtomicU64,
    request_count: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    healthy: AtomicBool,
}

impl Target {
    /// Builds a target in the healthy state with zero load counters.
    #[must_use]
    pub fn new(config: TargetConfig) -> Self {
        Target {
            config,
            current_connections: AtomicU32::new(0),
            average_response_time_millis_bits: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_3xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Number of connections currently open to this target.
    #[must_use]
    pub fn current_connections(&self) -> u32 {
        self.current_connections.load(Ordering::Relaxed)
    }

    /// Called when a new connection to this target is opened.
    pub fn connection_opened(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when a connection to this target is closed. Pairs with
    /// [`Self::connection_opened`]; callers must guarantee this runs even on
    /// the error path so the counter never leaks.
    pub fn connection_closed(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current EWMA of response time in milliseconds.
    #[must_use]
    pub fn average_response_time_millis(&self) -> f64 {
        f64::from_bits(self.average_response_time_millis_bits.load(Ordering::Relaxed))
    }

    /// Folds a new response-time sample into the EWMA (§4.7: 0.8 old / 0.2 new).
    pub fn record_response_time(&self, sample_millis: f64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let mut observed = self.average_response_time_millis_bits.load(Ordering::Relaxed);
        loop {
            let current = f64::from_bits(observed);
            let updated = if current == 0.0 {
                sample_millis
            } else {
                current * EWMA_OLD_WEIGHT + sample_millis * EWMA_NEW_WEIGHT
            };
            match self.average_response_time_millis_bits.compare_exchange_weak(
                observed,
                updated.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current_bits) => observed = current_bits,
            }
        }
    }

    /// Total requests observed for this target.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Records an HTTP response's status class (`status / 100`).
    pub fn record_status(&self, status: u16) {
        let counter = match status / 100 {
            2 => &self.status_2xx,
            3 => &self.status_3xx,
            4 => &self.status_4xx,
            5 => &self.status_5xx,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the per-class HTTP response counters (2xx, 3xx, 4xx, 5xx).
    #[must_use]
    pub fn status_counts(&self) -> [u64; 4] {
        [
            self.status_2xx.load(Ordering::Relaxed),
            self.status_3xx.load(Ordering::Relaxed),
            self.status_4xx.load(Ordering::Relaxed),
            self.status_5xx.load(Ordering::Relaxed),
        ]
    }

    /// Whether health checks currently consider this target usable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Marks this target healthy or unhealthy.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_time_ewma_blends_old_and_new_at_eighty_twenty() {
        let target = Target::new(TargetConfig::new("10.0.0.1", 80, 8080, "east"));
        target.record_response_time(100.0);
        assert_eq!(target.average_response_time_millis(), 100.0);

        target.record_response_time(200.0);
        let expected = 100.0 * 0.8 + 200.0 * 0.2;
        assert!((target.average_response_time_millis() - expected).abs() < 1e-9);
    }

    #[test]
    fn connection_counter_tracks_open_and_close() {
        let target = Target::new(TargetConfig::new("10.0.0.1", 80, 8080, "east"));
        target.connection_opened();
        target.connection_opened();
        assert_eq!(target.current_connections(), 2);
        target.connection_closed();
        assert_eq!(target.current_connections(), 1);
    }

    #[test]
    fn status_counters_bucket_by_class() {
        let target = Target::new(TargetConfig::new("10.0.0.1", 80, 8080, "east"));
        target.record_status(200);
        target.record_status(201);
        target.record_status(404);
        target.record_status(503);
        assert_eq!(target.status_counts(), [2, 0, 1, 1]);
    }
}
