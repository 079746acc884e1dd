//! Endpoint lifecycle: builds one [`EndpointRuntime`] per configured
//! endpoint and starts/stops its listener (§4.8's "Start creates listeners;
//! Stop(grace) ...").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use balancer::{build_strategy, Strategy, Target, TargetPool};
use config::{EndpointConfig, ListenerProtocol, ServerConfig, ZoneMap};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::metrics::{ActivityTable, EndpointStatus, MetricsSnapshot, TargetMetrics};
use crate::{http, tcp, udp};

/// `"ip:targetPort"`, the label every per-target metric and activity entry
/// is keyed by.
#[must_use]
pub fn target_label(config: &balancer::TargetConfig) -> String {
    format!("{}:{}", config.ip, config.target_port)
}

/// Everything one running endpoint needs: its declarative config, the
/// constructed target pool and strategy, an optional TLS server config, and
/// the bookkeeping the metrics collector reads.
pub struct EndpointRuntime {
    /// The endpoint's declarative configuration.
    pub config: EndpointConfig,
    /// The backend target pool, built from `config.targets`.
    pub pool: TargetPool,
    /// The constructed backend-selection strategy.
    pub strategy: Arc<dyn Strategy>,
    /// TLS server config, present when `config.protocol == Tls` or an HTTP
    /// endpoint is configured to terminate TLS.
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Zone map shared across endpoints, for zone-affinity context.
    pub zone_map: Option<Arc<ZoneMap>>,
    /// Per-target last-activity tracking.
    pub activity: ActivityTable,
    is_active: AtomicBool,
    active_connections: AtomicU64,
    cancel: CancellationToken,
}

impl EndpointRuntime {
    fn new(config: EndpointConfig, tls_config: Option<Arc<rustls::ServerConfig>>, zone_map: Option<Arc<ZoneMap>>) -> Result<Self, ProxyError> {
        let targets: Vec<Arc<Target>> = config
            .targets
            .iter()
            .cloned()
            .map(|target_config| Arc::new(Target::new(target_config)))
            .collect();
        let strategy = build_strategy(config.load_balancing_algorithm, config.has_hash_key_selector)?;

        Ok(EndpointRuntime {
            config,
            pool: TargetPool::new(targets),
            strategy,
            tls_config,
            zone_map,
            activity: ActivityTable::new(),
            is_active: AtomicBool::new(false),
            active_connections: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    /// Builds a runtime with no TLS config and no zone map, for tests in
    /// sibling modules that only exercise routing/rewrite logic.
    #[cfg(test)]
    pub(crate) fn for_test(config: EndpointConfig) -> Self {
        EndpointRuntime::new(config, None, None).expect("test endpoint config always builds a strategy")
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            listen_port: self.config.listen_port,
            protocol: self.config.protocol,
            is_active: self.is_active.load(Ordering::Relaxed),
        }
    }

    fn target_metrics(&self) -> Vec<TargetMetrics> {
        self.pool
            .all()
            .iter()
            .map(|target| {
                let label = target_label(&target.config);
                TargetMetrics {
                    target: label.clone(),
                    active: target.current_connections(),
                    total: target.request_count(),
                    last_activity_millis: self.activity.last_activity(&label),
                }
            })
            .collect()
    }
}

/// Owns every configured endpoint's runtime and listener task, and builds
/// the metrics snapshot the control surface reads (C8, C9).
pub struct ProxyManager {
    endpoints: Vec<Arc<EndpointRuntime>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ProxyManager {
    /// Builds one [`EndpointRuntime`] per entry in `server_config.endpoints`,
    /// loading each endpoint's TLS material (falling back to the global
    /// `server_certificate` for a `Tls` endpoint that declares none of its
    /// own) and the shared zone map, but without starting any listener yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Tls`] if a TLS endpoint's certificate can't be
    /// loaded or generated, or [`ProxyError::NoTargetsAvailable`] if an
    /// endpoint selects a strategy its configuration doesn't support.
    pub fn build(server_config: &ServerConfig, zone_map: Option<Arc<ZoneMap>>) -> Result<Self, ProxyError> {
        let mut endpoints = Vec::with_capacity(server_config.endpoints.len());

        for endpoint_config in &server_config.endpoints {
            let tls_config = if endpoint_config.protocol == ListenerProtocol::Tls || endpoint_config.client_certificate_required {
                let (cert_path, key_path) = endpoint_config
                    .server_certificate
                    .clone()
                    .or_else(|| server_config.server_certificate.clone())
                    .ok_or_else(|| {
                        ProxyError::Tls(tlsmgr::TlsError::Empty {
                            path: format!("endpoint on port {}", endpoint_config.listen_port),
                            kind: "certificate",
                        })
                    })?;
                let bundle = tlsmgr::load_or_generate(
                    &cert_path,
                    &key_path,
                    &server_config.service_name,
                    &[server_config.service_name.clone()],
                )?;
                Some(tlsmgr::build_server_config(bundle, endpoint_config.client_certificate_required)?)
            } else {
                None
            };

            endpoints.push(Arc::new(EndpointRuntime::new(
                endpoint_config.clone(),
                tls_config,
                zone_map.clone(),
            )?));
        }

        Ok(ProxyManager {
            endpoints,
            handles: tokio::sync::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Starts every endpoint's listener, each on its own task.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if any listener fails to bind; endpoints
    /// already started before the failing one keep running (the caller
    /// decides whether a partial start is acceptable).
    pub async fn start(&self) -> Result<(), ProxyError> {
        let mut handles = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            endpoint.is_active.store(true, Ordering::Relaxed);
            let cancel = self.cancel.clone();
            let endpoint = Arc::clone(endpoint);
            let handle = match endpoint.config.protocol {
                ListenerProtocol::Tcp | ListenerProtocol::Tls => {
                    tcp::bind_and_spawn(Arc::clone(&endpoint), cancel).await?
                }
                ListenerProtocol::Udp => udp::bind_and_spawn(Arc::clone(&endpoint), cancel).await?,
                ListenerProtocol::Http => http::bind_and_spawn(Arc::clone(&endpoint), cancel).await?,
            };
            handles.push(handle);
        }
        *self.handles.lock().await = handles;
        Ok(())
    }

    /// Two-phase shutdown (§4.8, §5): stop accepting, wait up to `grace` for
    /// listener tasks to notice cancellation and exit, then drop anything
    /// still running.
    pub async fn stop(&self, grace: Duration) {
        self.cancel.cancel();
        for endpoint in &self.endpoints {
            endpoint.is_active.store(false, Ordering::Relaxed);
        }
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        if tokio::time::timeout(grace, futures_join_all(handles)).await.is_err() {
            tracing::warn!("proxy manager shutdown grace period elapsed with listeners still running");
        }
    }

    /// Assembles a full metrics snapshot across every endpoint (§4.9).
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let mut targets_by_label: HashMap<String, TargetMetrics> = HashMap::new();
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        let mut total_active_connections = 0u64;

        for endpoint in &self.endpoints {
            endpoints.push(endpoint.status());
            for metrics in endpoint.target_metrics() {
                total_active_connections += u64::from(metrics.active);
                targets_by_label
                    .entry(metrics.target.clone())
                    .and_modify(|existing| {
                        existing.active += metrics.active;
                        existing.total += metrics.total;
                        existing.last_activity_millis = existing.last_activity_millis.max(metrics.last_activity_millis);
                    })
                    .or_insert(metrics);
            }
        }

        MetricsSnapshot {
            total_active_connections,
            targets: targets_by_label.into_values().collect(),
            endpoints,
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balancer::LoadBalancingAlgorithm;
    use config::HttpRewrite;

    fn endpoint_config() -> EndpointConfig {
        EndpointConfig {
            listen_ip: "0.0.0.0".parse().unwrap(),
            listen_port: 0,
            protocol: ListenerProtocol::Tcp,
            targets: vec![balancer::TargetConfig::new("10.0.0.1", 9090, 9090, "east")],
            max_connections: 10,
            client_certificate_required: false,
            server_certificate: None,
            load_balancing_algorithm: LoadBalancingAlgorithm::RoundRobin,
            has_hash_key_selector: false,
            http_rewrite: HttpRewrite::default(),
            idle_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn target_label_combines_ip_and_target_port() {
        let config = balancer::TargetConfig::new("10.0.0.1", 9090, 8080, "east");
        assert_eq!(target_label(&config), "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn build_succeeds_for_a_plain_tcp_endpoint_with_no_tls() {
        let server_config = ServerConfig {
            service_name: "relay".to_string(),
            log_dir: "./log".into(),
            session_bind: "0.0.0.0:9000".parse().unwrap(),
            session_tls: false,
            server_certificate: None,
            file_root: "./data".into(),
            heartbeat_timeout: Duration::from_secs(45),
            zone_map_path: None,
            endpoints: vec![endpoint_config()],
        };
        let manager = ProxyManager::build(&server_config, None).unwrap();
        let snapshot = manager.metrics_snapshot();
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(snapshot.targets.len(), 1);
    }
}
