//! UDP NAT-mapping forwarding (§4.8): one front socket, and one backend
//! socket per distinct client source address, torn down once that source
//! goes quiet for longer than the endpoint's idle timeout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use balancer::RequestContext;
use config::resolve_zone;
use dashmap::DashMap;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::manager::{target_label, EndpointRuntime};
use crate::metrics::now_millis;

const UDP_BUFFER_LEN: usize = 64 * 1024;
const MAPPING_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct UdpMapping {
    backend: Arc<UdpSocket>,
    last_activity_millis: AtomicU64,
    cancel: CancellationToken,
}

/// Binds the front socket through `socket2` (for `SO_REUSEADDR`) and spawns
/// the forwarding loop.
///
/// # Errors
///
/// Returns [`ProxyError::Bind`] if the front socket cannot be bound.
pub(crate) async fn bind_and_spawn(
    endpoint: Arc<EndpointRuntime>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, ProxyError> {
    let addr = SocketAddr::new(endpoint.config.listen_ip, endpoint.config.listen_port);
    let bind_error = |source: std::io::Error| ProxyError::Bind {
        port: endpoint.config.listen_port,
        source,
    };

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, None).map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    let front = UdpSocket::from_std(socket.into()).map_err(bind_error)?;

    Ok(tokio::spawn(run(endpoint, Arc::new(front), cancel)))
}

async fn run(endpoint: Arc<EndpointRuntime>, front: Arc<UdpSocket>, cancel: CancellationToken) {
    let mappings: Arc<DashMap<SocketAddr, UdpMapping>> = Arc::new(DashMap::new());
    let mut buf = [0u8; UDP_BUFFER_LEN];
    let mut sweep = tokio::time::interval(MAPPING_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                for entry in mappings.iter() {
                    entry.value().cancel.cancel();
                }
                return;
            }
            _ = sweep.tick() => {
                sweep_idle_mappings(&mappings, endpoint.config.idle_timeout);
            }
            received = front.recv_from(&mut buf) => {
                let (len, peer_addr) = match received {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(port = endpoint.config.listen_port, %error, "udp recv failed");
                        continue;
                    }
                };
                if let Err(error) =
                    forward_datagram(&endpoint, &front, &mappings, peer_addr, &buf[..len], &cancel).await
                {
                    tracing::warn!(%peer_addr, port = endpoint.config.listen_port, %error, "udp forwarding failed");
                }
            }
        }
    }
}

fn sweep_idle_mappings(mappings: &DashMap<SocketAddr, UdpMapping>, idle_timeout: Duration) {
    let now = now_millis();
    let idle_millis = idle_timeout.as_millis() as u64;
    mappings.retain(|_, mapping| {
        let alive = now.saturating_sub(mapping.last_activity_millis.load(Ordering::Relaxed)) < idle_millis;
        if !alive {
            mapping.cancel.cancel();
        }
        alive
    });
}

async fn forward_datagram(
    endpoint: &Arc<EndpointRuntime>,
    front: &Arc<UdpSocket>,
    mappings: &Arc<DashMap<SocketAddr, UdpMapping>>,
    peer_addr: SocketAddr,
    payload: &[u8],
    parent_cancel: &CancellationToken,
) -> std::io::Result<()> {
    if let Some(mapping) = mappings.get(&peer_addr) {
        mapping.last_activity_millis.store(now_millis(), Ordering::Relaxed);
        return mapping.backend.send(payload).await.map(|_| ());
    }

    let context = RequestContext {
        client_zone: resolve_zone(endpoint.zone_map.as_deref(), peer_addr.ip()),
        hash_key: Some(peer_addr.ip().to_string()),
    };
    let healthy = endpoint.pool.healthy();
    let target = endpoint
        .strategy
        .select(&healthy, &context)
        .map_err(std::io::Error::other)?;
    let label = target_label(&target.config);

    let bind_addr = if peer_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let backend = UdpSocket::bind(bind_addr).await?;
    backend.connect((target.config.ip.as_str(), target.config.target_port)).await?;
    let backend = Arc::new(backend);

    target.connection_opened();
    endpoint.connection_opened();
    endpoint.activity.touch(&label);

    let mapping_cancel = parent_cancel.child_token();
    mappings.insert(
        peer_addr,
        UdpMapping {
            backend: Arc::clone(&backend),
            last_activity_millis: AtomicU64::new(now_millis()),
            cancel: mapping_cancel.clone(),
        },
    );

    let front_for_reply = Arc::clone(front);
    let backend_for_reply = Arc::clone(&backend);
    let mappings_for_cleanup = Arc::clone(mappings);
    let endpoint_for_cleanup = Arc::clone(endpoint);
    let target_for_cleanup = Arc::clone(&target);
    tokio::spawn(async move {
        reply_loop(front_for_reply, backend_for_reply, peer_addr, mapping_cancel).await;
        mappings_for_cleanup.remove(&peer_addr);
        target_for_cleanup.connection_closed();
        endpoint_for_cleanup.connection_closed();
    });

    backend.send(payload).await.map(|_| ())
}

async fn reply_loop(front: Arc<UdpSocket>, backend: Arc<UdpSocket>, peer_addr: SocketAddr, cancel: CancellationToken) {
    let mut buf = [0u8; UDP_BUFFER_LEN];
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            received = backend.recv(&mut buf) => {
                match received {
                    Ok(len) => {
                        if front.send_to(&buf[..len], peer_addr).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}
