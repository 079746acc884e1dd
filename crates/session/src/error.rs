/// Errors raised while building or starting the session-server listener
/// (§4.1, §4.14, §7).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The configured `sessionBind` address is already in use or otherwise
    /// unbindable.
    #[error("failed to bind session listener on port {port}: {source}")]
    Bind {
        /// Port that could not be bound.
        port: u16,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// TLS material for the session listener could not be loaded or
    /// generated.
    #[error(transparent)]
    Tls(#[from] tlsmgr::TlsError),
}
