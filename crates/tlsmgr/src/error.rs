/// Errors raised while loading, generating, or validating TLS material
/// (§4.10, §7).
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Failed to read a certificate or key file from disk.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a generated certificate or key file to disk.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path that could not be written.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The PEM file contained no certificate, or no private key, where one
    /// was required.
    #[error("{path} contains no {kind}")]
    Empty {
        /// File that was expected to contain the item.
        path: String,
        /// What was missing (`"certificate"` or `"private key"`).
        kind: &'static str,
    },

    /// A certificate or key in a PEM file could not be parsed.
    #[error("failed to parse PEM {kind} in {path}: {source}")]
    Parse {
        /// File the malformed item came from.
        path: String,
        /// What kind of item failed to parse.
        kind: &'static str,
        /// Underlying parse failure.
        #[source]
        source: std::io::Error,
    },

    /// Self-signed certificate generation failed.
    #[error("failed to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),

    /// `rustls` rejected a loaded certificate, key, or configuration.
    #[error("rustls rejected the TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    /// A presented client certificate's thumbprint was not on the allow list.
    #[error("client certificate thumbprint {0} is not on the allow list")]
    ThumbprintNotAllowed(String),

    /// A client certificate was required but none was presented.
    #[error("client certificate required but none was presented")]
    ClientCertificateRequired,

    /// The certificate chain did not validate cleanly (non-dev mode), or
    /// carried chain errors beyond the dev-mode `{UntrustedRoot}` exception.
    #[error("client certificate chain validation failed: {0:?}")]
    ChainNotClean(Vec<crate::validate::ChainStatus>),

    /// The certificate's subject was not in the configured allow-list.
    #[error("client certificate subject {0:?} is not in the allowed-subjects list")]
    SubjectNotAllowed(String),

    /// The certificate's `notAfter` is not in the future.
    #[error("client certificate has expired")]
    CertificateExpired,
}
