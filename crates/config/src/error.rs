/// Errors raised while loading or validating the configuration surface
/// (§4.11, §7).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config or zone-map file from disk.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A line in the config or zone-map file could not be parsed.
    #[error("{file}:{line}: {reason}")]
    Parse {
        /// File the malformed line came from.
        file: String,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// Two endpoints declared the same `listenPort` (§3's "Endpoint config"
    /// invariant: "listenPorts unique across the active set").
    #[error("duplicate listen port {0} across endpoints")]
    DuplicatePort(u16),

    /// A TLS endpoint was declared without a server certificate (§3's
    /// invariant: "TLS endpoints carry a non-null server certificate").
    #[error("endpoint on port {0} requires TLS but declares no server certificate")]
    MissingServerCertificate(u16),

    /// An endpoint selected the `Hash` load-balancing algorithm without a
    /// key selector (§9, enforced at endpoint construction).
    #[error("endpoint on port {0} selects the hash strategy but supplies no key selector")]
    MissingKeySelector(u16),

    /// An endpoint declared no target servers at all.
    #[error("endpoint on port {0} declares no target servers")]
    NoTargets(u16),
}
