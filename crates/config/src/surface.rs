//! The top-level configuration surface (C11, §4.11, §6): global session
//! server settings plus the declarative endpoint list, parsed from a flat
//! `key = value` text file with repeated `[endpoint]` sections.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use balancer::{BackendProtocol, LoadBalancingAlgorithm, TargetConfig};

use crate::endpoint::{EndpointConfig, HttpRewrite, ListenerProtocol};
use crate::error::ConfigError;

/// Global session-server settings (service identity, log dir, ports, TLS
/// paths) plus the endpoint list the proxy manager starts (§4.11).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Name used in logs and the control CLI's `status` output.
    pub service_name: String,
    /// Directory log output is written under (consumed by the process
    /// entry point's `tracing` setup, §4.12).
    pub log_dir: PathBuf,
    /// Address the session server's framed-protocol listener binds.
    pub session_bind: std::net::SocketAddr,
    /// Whether the session server listener is TLS-wrapped.
    pub session_tls: bool,
    /// PEM certificate/key pair the session server presents when
    /// `session_tls` is set; also the default for endpoints that don't
    /// declare their own.
    pub server_certificate: Option<(PathBuf, PathBuf)>,
    /// Root directory per-client file directories are created under.
    pub file_root: PathBuf,
    /// Heartbeat timeout (§4.6, default 45s).
    pub heartbeat_timeout: Duration,
    /// Path to the zone map file (`ip-rules.txt`), if zone affinity is used.
    pub zone_map_path: Option<PathBuf>,
    /// Declared proxy endpoints.
    pub endpoints: Vec<EndpointConfig>,
}

impl ServerConfig {
    /// Validates every endpoint individually and the cross-endpoint
    /// invariant that listen ports are unique (§3).
    ///
    /// # Errors
    ///
    /// Propagates any [`EndpointConfig::validate`] failure, or returns
    /// [`ConfigError::DuplicatePort`] if two endpoints share a port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_ports = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !seen_ports.insert(endpoint.listen_port) {
                return Err(ConfigError::DuplicatePort(endpoint.listen_port));
            }
        }
        Ok(())
    }

    /// Loads and parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] on a malformed line.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Parses the `key = value` / `[endpoint]` text format described at the
    /// top of this module.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on a malformed line (missing `=`,
    /// unparsable address, unknown protocol/algorithm name, malformed
    /// `target` column list).
    pub fn parse(file_name: &str, text: &str) -> Result<Self, ConfigError> {
        let mut builder = Builder::default();
        let mut current: Option<EndpointBuilder> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            if line == "[endpoint]" {
                if let Some(endpoint) = current.take() {
                    builder.endpoints.push(endpoint.build(file_name, line_number)?);
                }
                current = Some(EndpointBuilder::default());
                continue;
            }

            let (key, value) = split_key_value(file_name, line_number, line)?;

            match &mut current {
                Some(endpoint) => endpoint.apply(file_name, line_number, key, value)?,
                None => builder.apply(file_name, line_number, key, value)?,
            }
        }

        if let Some(endpoint) = current.take() {
            builder.endpoints.push(endpoint.build(file_name, text.lines().count())?);
        }

        builder.finish(file_name)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn split_key_value<'a>(file_name: &str, line: usize, text: &'a str) -> Result<(&'a str, &'a str), ConfigError> {
    text.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| ConfigError::Parse {
            file: file_name.to_string(),
            line,
            reason: format!("expected `key = value`, got {text:?}"),
        })
}

fn parse_error(file_name: &str, line: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::Parse {
        file: file_name.to_string(),
        line,
        reason: reason.into(),
    }
}

#[derive(Default)]
struct Builder {
    service_name: Option<String>,
    log_dir: Option<PathBuf>,
    session_bind: Option<std::net::SocketAddr>,
    session_tls: bool,
    server_certificate: Option<(PathBuf, PathBuf)>,
    file_root: Option<PathBuf>,
    heartbeat_timeout: Option<Duration>,
    zone_map_path: Option<PathBuf>,
    endpoints: Vec<EndpointConfig>,
    server_cert_path: Option<PathBuf>,
    server_key_path: Option<PathBuf>,
}

impl Builder {
    fn apply(&mut self, file_name: &str, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "service_name" => self.service_name = Some(value.to_string()),
            "log_dir" => self.log_dir = Some(PathBuf::from(value)),
            "session_bind" => {
                self.session_bind = Some(value.parse().map_err(|err| {
                    parse_error(file_name, line, format!("invalid session_bind {value:?}: {err}"))
                })?);
            }
            "session_tls" => self.session_tls = parse_bool(file_name, line, value)?,
            "server_certificate" => self.server_cert_path = Some(PathBuf::from(value)),
            "server_key" => self.server_key_path = Some(PathBuf::from(value)),
            "file_root" => self.file_root = Some(PathBuf::from(value)),
            "heartbeat_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|err| parse_error(file_name, line, format!("invalid heartbeat_timeout_secs: {err}")))?;
                self.heartbeat_timeout = Some(Duration::from_secs(secs));
            }
            "zone_map" => self.zone_map_path = Some(PathBuf::from(value)),
            other => return Err(parse_error(file_name, line, format!("unknown global key {other:?}"))),
        }
        Ok(())
    }

    fn finish(mut self, file_name: &str) -> Result<ServerConfig, ConfigError> {
        if let (Some(cert), Some(key)) = (self.server_cert_path.take(), self.server_key_path.take()) {
            self.server_certificate = Some((cert, key));
        }
        let config = ServerConfig {
            service_name: self.service_name.unwrap_or_else(|| "relay-server".to_string()),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./log")),
            session_bind: self.session_bind.ok_or_else(|| {
                parse_error(file_name, 0, "missing required global key session_bind")
            })?,
            session_tls: self.session_tls,
            server_certificate: self.server_certificate,
            file_root: self.file_root.unwrap_or_else(|| PathBuf::from("./data")),
            heartbeat_timeout: self.heartbeat_timeout.unwrap_or(Duration::from_secs(45)),
            zone_map_path: self.zone_map_path,
            endpoints: self.endpoints,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Default)]
struct EndpointBuilder {
    listen: Option<std::net::SocketAddr>,
    protocol: Option<ListenerProtocol>,
    algorithm: Option<LoadBalancingAlgorithm>,
    max_connections: Option<usize>,
    client_certificate_required: bool,
    server_cert_path: Option<PathBuf>,
    server_key_path: Option<PathBuf>,
    targets: Vec<TargetConfig>,
    strip_prefix: Option<String>,
    add_headers: Vec<(String, String)>,
    idle_timeout_secs: Option<u64>,
    has_hash_key_selector: bool,
}

impl EndpointBuilder {
    fn apply(&mut self, file_name: &str, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "listen" => {
                self.listen = Some(
                    value
                        .parse()
                        .map_err(|err| parse_error(file_name, line, format!("invalid listen address {value:?}: {err}")))?,
                );
            }
            "protocol" => self.protocol = Some(parse_protocol(file_name, line, value)?),
            "algorithm" => self.algorithm = Some(parse_algorithm(file_name, line, value)?),
            "max_connections" => {
                self.max_connections = Some(
                    value
                        .parse()
                        .map_err(|err| parse_error(file_name, line, format!("invalid max_connections: {err}")))?,
                );
            }
            "client_certificate_required" => {
                self.client_certificate_required = parse_bool(file_name, line, value)?;
            }
            "server_certificate" => self.server_cert_path = Some(PathBuf::from(value)),
            "server_key" => self.server_key_path = Some(PathBuf::from(value)),
            "strip_prefix" => self.strip_prefix = Some(value.to_string()),
            "add_header" => {
                let (header, header_value) = value.split_once(':').ok_or_else(|| {
                    parse_error(file_name, line, format!("invalid add_header {value:?}, expected `Name: value`"))
                })?;
                self.add_headers.push((header.trim().to_string(), header_value.trim().to_string()));
            }
            "idle_timeout_secs" => {
                self.idle_timeout_secs = Some(
                    value
                        .parse()
                        .map_err(|err| parse_error(file_name, line, format!("invalid idle_timeout_secs: {err}")))?,
                );
            }
            "hash_key_selector" => {
                self.has_hash_key_selector = parse_bool(file_name, line, value)?;
            }
            "target" => self.targets.push(parse_target(file_name, line, value)?),
            other => return Err(parse_error(file_name, line, format!("unknown endpoint key {other:?}"))),
        }
        Ok(())
    }

    fn build(self, file_name: &str, line: usize) -> Result<EndpointConfig, ConfigError> {
        let listen = self
            .listen
            .ok_or_else(|| parse_error(file_name, line, "endpoint section missing required `listen` key"))?;
        let protocol = self
            .protocol
            .ok_or_else(|| parse_error(file_name, line, "endpoint section missing required `protocol` key"))?;

        let server_certificate = match (self.server_cert_path, self.server_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        };

        Ok(EndpointConfig {
            listen_ip: listen.ip(),
            listen_port: listen.port(),
            protocol,
            targets: self.targets,
            max_connections: self.max_connections.unwrap_or(1024),
            client_certificate_required: self.client_certificate_required,
            server_certificate,
            load_balancing_algorithm: self.algorithm.unwrap_or(LoadBalancingAlgorithm::RoundRobin),
            has_hash_key_selector: self.has_hash_key_selector,
            http_rewrite: HttpRewrite {
                strip_prefix: self.strip_prefix,
                add_headers: self.add_headers,
            },
            idle_timeout: Duration::from_secs(self.idle_timeout_secs.unwrap_or_else(|| default_idle_timeout_secs(protocol))),
        })
    }
}

/// Default idle timeout per protocol (§4.8): 30s for TCP/TLS/HTTP
/// connections, 5 minutes for a UDP NAT mapping.
fn default_idle_timeout_secs(protocol: ListenerProtocol) -> u64 {
    match protocol {
        ListenerProtocol::Udp => 300,
        ListenerProtocol::Tcp | ListenerProtocol::Tls | ListenerProtocol::Http => 30,
    }
}

fn parse_bool(file_name: &str, line: usize, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(parse_error(file_name, line, format!("invalid boolean {other:?}"))),
    }
}

fn parse_protocol(file_name: &str, line: usize, value: &str) -> Result<ListenerProtocol, ConfigError> {
    match value {
        "tcp" => Ok(ListenerProtocol::Tcp),
        "tls" => Ok(ListenerProtocol::Tls),
        "udp" => Ok(ListenerProtocol::Udp),
        "http" => Ok(ListenerProtocol::Http),
        other => Err(parse_error(file_name, line, format!("unknown protocol {other:?}"))),
    }
}

fn parse_algorithm(file_name: &str, line: usize, value: &str) -> Result<LoadBalancingAlgorithm, ConfigError> {
    match value {
        "least_connections" => Ok(LoadBalancingAlgorithm::LeastConnections),
        "round_robin" => Ok(LoadBalancingAlgorithm::RoundRobin),
        "random" => Ok(LoadBalancingAlgorithm::Random),
        "weighted_round_robin" => Ok(LoadBalancingAlgorithm::WeightedRoundRobin),
        "hash" => Ok(LoadBalancingAlgorithm::Hash),
        "least_response_time" => Ok(LoadBalancingAlgorithm::LeastResponseTime),
        "zone_affinity" => Ok(LoadBalancingAlgorithm::ZoneAffinity),
        other => Err(parse_error(file_name, line, format!("unknown load-balancing algorithm {other:?}"))),
    }
}

/// Parses a `target` line: `ip:port:targetPort:zone[:weight[:backendProtocol]]`.
fn parse_target(file_name: &str, line: usize, value: &str) -> Result<TargetConfig, ConfigError> {
    let columns: Vec<&str> = value.split(':').collect();
    if columns.len() < 4 {
        return Err(parse_error(
            file_name,
            line,
            format!("target {value:?} needs at least ip:port:targetPort:zone"),
        ));
    }
    let ip = columns[0].to_string();
    let port: u16 = columns[1]
        .parse()
        .map_err(|err| parse_error(file_name, line, format!("invalid target port: {err}")))?;
    let target_port: u16 = columns[2]
        .parse()
        .map_err(|err| parse_error(file_name, line, format!("invalid target targetPort: {err}")))?;
    let zone = columns[3].to_string();

    let mut target = TargetConfig::new(ip, port, target_port, zone);

    if let Some(weight_column) = columns.get(4) {
        target.weight = weight_column
            .parse()
            .map_err(|err| parse_error(file_name, line, format!("invalid target weight: {err}")))?;
    }
    if let Some(backend_column) = columns.get(5) {
        target.backend_protocol = match *backend_column {
            "tcp" => BackendProtocol::Tcp,
            "ssl_tcp" | "tls" => BackendProtocol::SslTcp,
            "udp" => BackendProtocol::Udp,
            other => return Err(parse_error(file_name, line, format!("unknown backend protocol {other:?}"))),
        };
    }

    Ok(target)
}

/// Resolves `addr`'s zone via `zone_map`, falling back to `None` when no
/// zone map is configured or the address is unmatched.
#[must_use]
pub fn resolve_zone(zone_map: Option<&crate::zone_map::ZoneMap>, addr: IpAddr) -> Option<String> {
    zone_map.and_then(|map| map.lookup(addr)).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
service_name = demo-relay
session_bind = 0.0.0.0:9443
session_tls = true
server_certificate = server.cer
server_key = server.key
heartbeat_timeout_secs = 45
zone_map = ip-rules.txt

[endpoint]
listen = 0.0.0.0:8443
protocol = http
algorithm = round_robin
max_connections = 512
strip_prefix = /api
add_header = X-Forwarded-Proto: https
target = 10.0.0.1:8443:9090:east:5:tcp
target = 10.0.0.2:8443:9090:west:5:tcp

[endpoint]
listen = 0.0.0.0:9000
protocol = tcp
algorithm = least_connections
target = 10.0.0.3:9000:9100:east
";

    #[test]
    fn parses_globals_and_both_endpoint_sections() {
        let config = ServerConfig::parse("relay.conf", EXAMPLE).unwrap();
        assert_eq!(config.service_name, "demo-relay");
        assert!(config.session_tls);
        assert_eq!(config.endpoints.len(), 2);

        let http_endpoint = &config.endpoints[0];
        assert_eq!(http_endpoint.listen_port, 8443);
        assert_eq!(http_endpoint.targets.len(), 2);
        assert_eq!(http_endpoint.http_rewrite.strip_prefix.as_deref(), Some("/api"));
        assert_eq!(
            http_endpoint.http_rewrite.add_headers,
            vec![("X-Forwarded-Proto".to_string(), "https".to_string())]
        );

        let tcp_endpoint = &config.endpoints[1];
        assert_eq!(tcp_endpoint.listen_port, 9000);
        assert_eq!(tcp_endpoint.load_balancing_algorithm, LoadBalancingAlgorithm::LeastConnections);
    }

    #[test]
    fn duplicate_listen_ports_are_rejected() {
        let text = EXAMPLE.replace("0.0.0.0:9000", "0.0.0.0:8443");
        let err = ServerConfig::parse("relay.conf", &text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(8443)));
    }

    #[test]
    fn missing_session_bind_is_a_parse_error() {
        let err = ServerConfig::parse("relay.conf", "service_name = x\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_global_key_is_rejected() {
        let err = ServerConfig::parse("relay.conf", "not_a_real_key = 1\nsession_bind = 0.0.0.0:1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }
}
