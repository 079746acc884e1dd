//! Declarative endpoint configuration (§3 "Endpoint config", §4.8, §4.11).

use std::net::IpAddr;
use std::path::PathBuf;

use balancer::{LoadBalancingAlgorithm, TargetConfig};

use crate::error::ConfigError;

/// The protocol a proxy endpoint's front listener speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerProtocol {
    /// Plain TCP front, forwarded byte-for-byte.
    Tcp,
    /// TLS-terminated front, forwarded byte-for-byte to the backend.
    Tls,
    /// Connectionless UDP front.
    Udp,
    /// HTTP front with request-line/header rewriting (§4.8).
    Http,
}

impl ListenerProtocol {
    /// True for the two protocols that require a server certificate
    /// (§3's "TLS endpoints carry a non-null server certificate").
    #[must_use]
    pub fn requires_server_certificate(self) -> bool {
        matches!(self, ListenerProtocol::Tls)
    }
}

/// Per-target HTTP rewriting rules (§4.8): an optional path-prefix strip
/// plus headers to add or overwrite before forwarding to the backend.
#[derive(Clone, Debug, Default)]
pub struct HttpRewrite {
    /// Path prefix stripped from the request line before forwarding, if present.
    pub strip_prefix: Option<String>,
    /// Additional or overriding headers sent to the backend.
    pub add_headers: Vec<(String, String)>,
}

/// One declared proxy endpoint: a front listener plus its backend target
/// pool and selection policy.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Address the front listener binds.
    pub listen_ip: IpAddr,
    /// Port the front listener binds; unique across the active endpoint set.
    pub listen_port: u16,
    /// Protocol the front listener speaks.
    pub protocol: ListenerProtocol,
    /// Configured backend targets, in declaration order.
    pub targets: Vec<TargetConfig>,
    /// Maximum concurrent front connections this endpoint admits.
    pub max_connections: usize,
    /// Whether the front listener demands a validated client certificate.
    pub client_certificate_required: bool,
    /// Paths to the PEM certificate and key this endpoint's front presents,
    /// required when `protocol.requires_server_certificate()`.
    pub server_certificate: Option<(PathBuf, PathBuf)>,
    /// The backend-selection algorithm.
    pub load_balancing_algorithm: LoadBalancingAlgorithm,
    /// True if this endpoint was built with a hash key selector, letting
    /// `load_balancing_algorithm == Hash` pass validation.
    pub has_hash_key_selector: bool,
    /// HTTP-only rewrite rules; ignored for non-HTTP protocols.
    pub http_rewrite: HttpRewrite,
    /// Idle timeout before a forwarded connection is closed (§4.8, default 30s).
    pub idle_timeout: std::time::Duration,
}

impl EndpointConfig {
    /// Validates the structural invariants §3 places on one endpoint:
    /// TLS fronts carry a certificate, at least one target is declared, and
    /// the hash strategy is only selected alongside a key selector.
    ///
    /// Cross-endpoint invariants (unique listen ports) are checked by
    /// [`crate::ServerConfig::validate`] over the whole set.
    ///
    /// # Errors
    ///
    /// See [`ConfigError::MissingServerCertificate`], [`ConfigError::NoTargets`],
    /// and [`ConfigError::MissingKeySelector`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol.requires_server_certificate() && self.server_certificate.is_none() {
            return Err(ConfigError::MissingServerCertificate(self.listen_port));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets(self.listen_port));
        }
        if self.load_balancing_algorithm == LoadBalancingAlgorithm::Hash && !self.has_hash_key_selector {
            return Err(ConfigError::MissingKeySelector(self.listen_port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_endpoint() -> EndpointConfig {
        EndpointConfig {
            listen_ip: "0.0.0.0".parse().unwrap(),
            listen_port: 8080,
            protocol: ListenerProtocol::Tcp,
            targets: vec![TargetConfig::new("10.0.0.1", 8080, 9090, "east")],
            max_connections: 1024,
            client_certificate_required: false,
            server_certificate: None,
            load_balancing_algorithm: LoadBalancingAlgorithm::RoundRobin,
            has_hash_key_selector: false,
            http_rewrite: HttpRewrite::default(),
            idle_timeout: std::time::Duration::from_secs(30),
        }
    }

    #[test]
    fn tls_endpoint_without_a_certificate_is_rejected() {
        let mut endpoint = base_endpoint();
        endpoint.protocol = ListenerProtocol::Tls;
        let err = endpoint.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingServerCertificate(8080)));
    }

    #[test]
    fn endpoint_with_no_targets_is_rejected() {
        let mut endpoint = base_endpoint();
        endpoint.targets.clear();
        let err = endpoint.validate().unwrap_err();
        assert!(matches!(err, ConfigError::NoTargets(8080)));
    }

    #[test]
    fn hash_algorithm_without_a_selector_is_rejected() {
        let mut endpoint = base_endpoint();
        endpoint.load_balancing_algorithm = LoadBalancingAlgorithm::Hash;
        let err = endpoint.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingKeySelector(8080)));
    }

    #[test]
    fn a_well_formed_endpoint_validates() {
        assert!(base_endpoint().validate().is_ok());
    }
}
