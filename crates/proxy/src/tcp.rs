//! TCP and TLS front-to-backend forwarding (§4.8): accept on the front
//! listener, select a backend through the endpoint's strategy, and splice
//! both directions until either side closes or the connection goes idle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use balancer::{BackendProtocol, RequestContext, Target};
use config::{resolve_zone, ListenerProtocol};
use rustls_pki_types::ServerName;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::manager::{target_label, EndpointRuntime};

/// A byte stream that is both readable and writable, erasing whether it's
/// plaintext TCP or a TLS session underneath.
pub(crate) trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Binds the front listener and spawns its accept loop.
///
/// # Errors
///
/// Returns [`ProxyError::Bind`] if the configured address is already in use
/// or otherwise unbindable.
pub(crate) async fn bind_and_spawn(
    endpoint: Arc<EndpointRuntime>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, ProxyError> {
    let addr = SocketAddr::new(endpoint.config.listen_ip, endpoint.config.listen_port);
    let listener = TcpListener::bind(addr).await.map_err(|source| ProxyError::Bind {
        port: endpoint.config.listen_port,
        source,
    })?;

    Ok(tokio::spawn(accept_loop(endpoint, listener, cancel)))
}

async fn accept_loop(endpoint: Arc<EndpointRuntime>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(port = endpoint.config.listen_port, %error, "tcp accept failed");
                        continue;
                    }
                };
                let endpoint = Arc::clone(&endpoint);
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(&endpoint, stream, peer_addr, conn_cancel).await {
                        tracing::warn!(%peer_addr, port = endpoint.config.listen_port, %error, "tcp forwarding connection ended with an error");
                    }
                });
            }
        }
    }
}

fn build_context(endpoint: &EndpointRuntime, peer_addr: SocketAddr) -> RequestContext {
    RequestContext {
        client_zone: resolve_zone(endpoint.zone_map.as_deref(), peer_addr.ip()),
        hash_key: Some(peer_addr.ip().to_string()),
    }
}

async fn handle_connection(
    endpoint: &Arc<EndpointRuntime>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    stream.set_nodelay(true).ok();

    let front: Box<dyn Duplex> = if endpoint.config.protocol == ListenerProtocol::Tls {
        let tls_config = endpoint
            .tls_config
            .clone()
            .expect("a TLS front endpoint always carries a server config");
        let acceptor = TlsAcceptor::from(tls_config);
        Box::new(acceptor.accept(stream).await?)
    } else {
        Box::new(stream)
    };

    let context = build_context(endpoint, peer_addr);
    let healthy = endpoint.pool.healthy();
    let target = endpoint.strategy.select(&healthy, &context)?;
    let label = target_label(&target.config);

    target.connection_opened();
    endpoint.connection_opened();
    endpoint.activity.touch(&label);

    let result = forward(endpoint, &target, front, cancel).await;

    target.connection_closed();
    endpoint.connection_closed();

    result.map_err(ProxyError::from)
}

async fn forward(
    endpoint: &EndpointRuntime,
    target: &Arc<Target>,
    front: Box<dyn Duplex>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let back = connect_backend(target).await?;
    let (front_read, front_write) = tokio::io::split(front);
    let (back_read, back_write) = tokio::io::split(back);
    let idle_timeout = endpoint.config.idle_timeout;

    tokio::select! {
        () = cancel.cancelled() => Ok(()),
        result = pump(front_read, back_write, idle_timeout) => result,
        result = pump(back_read, front_write, idle_timeout) => result,
    }
}

pub(crate) async fn connect_backend(target: &Arc<Target>) -> io::Result<Box<dyn Duplex>> {
    let addr = format!("{}:{}", target.config.ip, target.config.target_port);
    let stream = TcpStream::connect(&addr).await?;

    match target.config.backend_protocol {
        BackendProtocol::Tcp | BackendProtocol::Udp => Ok(Box::new(stream)),
        BackendProtocol::SslTcp => {
            let client_config = tlsmgr::build_client_config().map_err(|source| io::Error::other(source))?;
            let connector = TlsConnector::from(client_config);
            let server_name = ServerName::try_from(target.config.ip.clone())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid backend server name"))?;
            let tls_stream = connector.connect(server_name, stream).await?;
            Ok(Box::new(tls_stream))
        }
    }
}

/// Copies `reader` into `writer` until EOF, a write error, or `idle_timeout`
/// elapses between reads, at which point the half-connection is closed
/// gracefully rather than treated as an error (§4.8 idle timeout).
async fn pump<R, W>(mut reader: R, mut writer: W, idle_timeout: Duration) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = match tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => return Ok(()),
        };
        if read == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..read]).await?;
    }
}
