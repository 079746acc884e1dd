/// Errors raised while starting or running a proxy endpoint (§4.8, §7).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The front listener could not bind its configured address.
    #[error("failed to bind endpoint on port {port}: {source}")]
    Bind {
        /// Port the endpoint was configured to listen on.
        port: u16,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The load-balancing strategy found no healthy target to select.
    #[error(transparent)]
    NoTargetsAvailable(#[from] balancer::BalancerError),

    /// TLS material could not be loaded or a handshake failed.
    #[error(transparent)]
    Tls(#[from] tlsmgr::TlsError),

    /// A backend connection attempt or a splice loop failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request line or headers could not be parsed.
    #[error("malformed HTTP request: {0}")]
    HttpParse(String),
}
