//! Session-server accept loop (§4.1, §4.14): binds `sessionBind`, optionally
//! TLS-wrapped, and spawns one task per accepted connection.

use std::net::SocketAddr;
use std::sync::Arc;

use config::ServerConfig;
use pool::{DynamicWorkerPool, OutboundEnvelope};
use registry::{ConnectionRegistry, Transport};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use transfer::TransferManager;

use crate::connection::{handle_connection, Duplex};
use crate::error::SessionError;
use crate::outbound::OutboundRouter;

/// Shared state every accepted connection dispatches against.
pub(crate) struct Collaborators {
    pub registry: Arc<ConnectionRegistry>,
    pub transfer: Arc<TransferManager>,
    pub pool: Arc<DynamicWorkerPool<OutboundEnvelope>>,
    pub router: Arc<OutboundRouter>,
    pub max_frame_len: u32,
}

/// Accepts framed-protocol client connections (C1, C2) and dispatches their
/// decoded frames to the file transfer engine (C5) and relay pool (C3/C4).
pub struct SessionServer {
    bind: SocketAddr,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    collaborators: Arc<Collaborators>,
}

impl SessionServer {
    /// Builds the server, loading TLS material when `server_config.session_tls`
    /// is set. The session listener has no per-endpoint certificate override,
    /// so it always uses `server_config.server_certificate` (generating a
    /// self-signed pair on first start per §4.10 if none is configured).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Tls`] if TLS material can't be loaded or
    /// generated.
    pub fn build(
        server_config: &ServerConfig,
        registry: Arc<ConnectionRegistry>,
        transfer: Arc<TransferManager>,
        pool: Arc<DynamicWorkerPool<OutboundEnvelope>>,
        router: Arc<OutboundRouter>,
    ) -> Result<Self, SessionError> {
        let tls_config = if server_config.session_tls {
            let (cert_path, key_path) = server_config.server_certificate.clone().ok_or_else(|| {
                SessionError::Tls(tlsmgr::TlsError::Empty {
                    path: "session listener".to_string(),
                    kind: "certificate",
                })
            })?;
            let bundle = tlsmgr::load_or_generate(&cert_path, &key_path, &server_config.service_name, &[server_config.service_name.clone()])?;
            Some(tlsmgr::build_server_config(bundle, false)?)
        } else {
            None
        };

        Ok(SessionServer {
            bind: server_config.session_bind,
            tls_config,
            collaborators: Arc::new(Collaborators {
                registry,
                transfer,
                pool,
                router,
                max_frame_len: protocol::DEFAULT_MAX_FRAME_LEN,
            }),
        })
    }

    /// Binds the listener and spawns its accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Bind`] if the configured address is already
    /// in use.
    pub async fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, SessionError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| SessionError::Bind { port: self.bind.port(), source })?;
        let tls_config = self.tls_config.clone();
        let collaborators = Arc::clone(&self.collaborators);
        Ok(tokio::spawn(accept_loop(listener, tls_config, collaborators, cancel)))
    }
}

async fn accept_loop(listener: TcpListener, tls_config: Option<Arc<rustls::ServerConfig>>, collaborators: Arc<Collaborators>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(%error, "session accept failed");
                        continue;
                    }
                };
                stream.set_nodelay(true).ok();
                let tls_config = tls_config.clone();
                let collaborators = Arc::clone(&collaborators);
                tokio::spawn(async move {
                    accept_one(stream, peer_addr, tls_config, collaborators).await;
                });
            }
        }
    }
}

async fn accept_one(stream: TcpStream, peer_addr: SocketAddr, tls_config: Option<Arc<rustls::ServerConfig>>, collaborators: Arc<Collaborators>) {
    let (transport, boxed): (Transport, Box<dyn Duplex>) = match tls_config {
        Some(config) => {
            let acceptor = TlsAcceptor::from(config);
            match acceptor.accept(stream).await {
                Ok(tls_stream) => (Transport::Tls, Box::new(tls_stream)),
                Err(error) => {
                    tracing::warn!(%peer_addr, %error, "session TLS handshake failed");
                    return;
                }
            }
        }
        None => (Transport::Plain, Box::new(stream)),
    };

    handle_connection(boxed, peer_addr, transport, collaborators).await;
}
