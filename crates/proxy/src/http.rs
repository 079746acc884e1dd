//! Hand-rolled HTTP/1.1 forwarding (§4.8): parse the request line and
//! headers, apply the endpoint's prefix-strip and header rewrite rules,
//! forward to the selected backend, relay its response back, then close.
//! One transaction per accepted connection — no persistent keep-alive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use balancer::RequestContext;
use config::resolve_zone;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::manager::{target_label, EndpointRuntime};
use crate::tcp::connect_backend;

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
                        tracing::warn!(port = endpoint.config.listen_port, %error, "http accept failed");
                        continue;
                    }
                };
                let endpoint = Arc::clone(&endpoint);
                tokio::spawn(async move {
                    if let Err(error) = handle_connection(&endpoint, stream, peer_addr).await {
                        tracing::warn!(%peer_addr, port = endpoint.config.listen_port, %error, "http forwarding connection ended with an error");
                    }
                });
            }
        }
    }
}

struct RequestHead {
    method: String,
    path: String,
    version: String,
    headers: Vec<(String, String)>,
}

fn content_length(headers: &[(String, String)]) -> Option<usize> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

async fn read_head<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<RequestHead>, ProxyError> {
    let mut request_line = String::new();
    let bytes_read = reader
        .read_line(&mut request_line)
        .await
        .map_err(ProxyError::Io)?;
    if bytes_read == 0 {
        return Ok(None);
    }

    let mut parts = request_line.trim_end().splitn(3, ' ');
    let method = parts.next().ok_or_else(|| ProxyError::HttpParse("missing method".to_string()))?;
    let path = parts.next().ok_or_else(|| ProxyError::HttpParse("missing path".to_string()))?;
    let version = parts.next().ok_or_else(|| ProxyError::HttpParse("missing version".to_string()))?;
    let (method, path, version) = (method.to_string(), path.to_string(), version.to_string());

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(ProxyError::Io)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProxyError::HttpParse(format!("malformed header line {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Some(RequestHead {
        method,
        path,
        version,
        headers,
    }))
}

/// Writes a minimal `503 Service Unavailable` response when no healthy
/// target exists for this endpoint (§7 `NO_TARGETS_AVAILABLE`).
async fn write_service_unavailable<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W) -> Result<(), ProxyError> {
    const BODY: &str = "no healthy backend available\n";
    let response = format!("HTTP/1.1 503 Service Unavailable\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{BODY}", BODY.len());
    writer.write_all(response.as_bytes()).await?;
    Ok(())
}

fn apply_rewrite(endpoint: &EndpointRuntime, head: &mut RequestHead) {
    if let Some(prefix) = &endpoint.config.http_rewrite.strip_prefix {
        if let Some(stripped) = head.path.strip_prefix(prefix.as_str()) {
            head.path = if stripped.is_empty() { "/".to_string() } else { stripped.to_string() };
        }
    }
    for (name, value) in &endpoint.config.http_rewrite.add_headers {
        if let Some(existing) = head.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            existing.1 = value.clone();
        } else {
            head.headers.push((name.clone(), value.clone()));
        }
    }
}

async fn handle_connection(endpoint: &Arc<EndpointRuntime>, stream: TcpStream, peer_addr: SocketAddr) -> Result<(), ProxyError> {
    stream.set_nodelay(true).ok();
    let mut client = BufReader::new(stream);

    let Some(mut head) = read_head(&mut client).await? else {
        return Ok(());
    };
    apply_rewrite(endpoint, &mut head);

    let context = RequestContext {
        client_zone: resolve_zone(endpoint.zone_map.as_deref(), peer_addr.ip()),
        hash_key: Some(peer_addr.ip().to_string()),
    };
    let healthy = endpoint.pool.healthy();
    let target = match endpoint.strategy.select(&healthy, &context) {
        Ok(target) => target,
        Err(error) => {
            write_service_unavailable(&mut client).await?;
            return Err(ProxyError::from(error));
        }
    };
    let label = target_label(&target.config);

    target.connection_opened();
    endpoint.connection_opened();
    endpoint.activity.touch(&label);

    let result = relay_transaction(&mut client, &head, &target).await;

    target.connection_closed();
    endpoint.connection_closed();
    result
}

async fn relay_transaction<R>(client: &mut R, head: &RequestHead, target: &Arc<balancer::Target>) -> Result<(), ProxyError>
where
    R: tokio::io::AsyncBufRead + tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut backend = connect_backend(target).await?;

    let mut request_bytes = format!("{} {} {}\r\n", head.method, head.path, head.version);
    for (name, value) in &head.headers {
        request_bytes.push_str(name);
        request_bytes.push_str(": ");
        request_bytes.push_str(value);
        request_bytes.push_str("\r\n");
    }
    request_bytes.push_str("\r\n");
    backend.write_all(request_bytes.as_bytes()).await?;

    if let Some(length) = content_length(&head.headers) {
        let mut remaining = length;
        let mut chunk = [0u8; 16 * 1024];
        while remaining > 0 {
            let take = remaining.min(chunk.len());
            let read = client.read(&mut chunk[..take]).await?;
            if read == 0 {
                break;
            }
            backend.write_all(&chunk[..read]).await?;
            remaining -= read;
        }
    }

    let mut backend_reader = BufReader::new(backend);
    let mut status_line = String::new();
    backend_reader.read_line(&mut status_line).await?;
    let status_code: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    target.record_status(status_code);

    let mut response_headers = Vec::new();
    loop {
        let mut line = String::new();
        backend_reader.read_line(&mut line).await?;
        let trimmed = line.trim_end().to_string();
        if trimmed.is_empty() {
            break;
        }
        response_headers.push(trimmed);
    }

    let mut response_bytes = status_line.clone();
    for line in &response_headers {
        response_bytes.push_str(line);
        response_bytes.push_str("\r\n");
    }
    response_bytes.push_str("\r\n");
    client.write_all(response_bytes.as_bytes()).await?;

    let response_content_length = response_headers.iter().find_map(|line| {
        line.split_once(':').and_then(|(name, value)| {
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
    });

    match response_content_length {
        Some(length) => {
            let mut remaining = length;
            let mut chunk = [0u8; 16 * 1024];
            while remaining > 0 {
                let take = remaining.min(chunk.len());
                let read = backend_reader.read(&mut chunk[..take]).await?;
                if read == 0 {
                    break;
                }
                client.write_all(&chunk[..read]).await?;
                remaining -= read;
            }
        }
        None => {
            let mut chunk = [0u8; 16 * 1024];
            loop {
                let read = backend_reader.read(&mut chunk).await?;
                if read == 0 {
                    break;
                }
                client.write_all(&chunk[..read]).await?;
            }
        }
    }

    target.record_response_time(started.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::HttpRewrite;

    #[tokio::test]
    async fn read_head_parses_request_line_and_headers() {
        let raw = b"GET /widgets?id=1 HTTP/1.1\r\nHost: example.invalid\r\nContent-Length: 4\r\n\r\nbody".to_vec();
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).await.unwrap().unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/widgets?id=1");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(content_length(&head.headers), Some(4));
    }

    #[tokio::test]
    async fn read_head_returns_none_on_immediate_eof() {
        let raw: Vec<u8> = Vec::new();
        let mut reader = BufReader::new(&raw[..]);
        assert!(read_head(&mut reader).await.unwrap().is_none());
    }

    fn head(path: &str) -> RequestHead {
        RequestHead {
            method: "GET".to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![("X-Existing".to_string(), "old".to_string())],
        }
    }

    fn endpoint_with_rewrite(rewrite: HttpRewrite) -> EndpointRuntime {
        let config = config::EndpointConfig {
            listen_ip: "0.0.0.0".parse().unwrap(),
            listen_port: 0,
            protocol: config::ListenerProtocol::Http,
            targets: vec![balancer::TargetConfig::new("10.0.0.1", 9090, 9090, "east")],
            max_connections: 10,
            client_certificate_required: false,
            server_certificate: None,
            load_balancing_algorithm: balancer::LoadBalancingAlgorithm::RoundRobin,
            has_hash_key_selector: false,
            http_rewrite: rewrite,
            idle_timeout: std::time::Duration::from_secs(30),
        };
        EndpointRuntime::for_test(config)
    }

    #[test]
    fn apply_rewrite_strips_the_configured_prefix() {
        let endpoint = endpoint_with_rewrite(HttpRewrite {
            strip_prefix: Some("/api".to_string()),
            add_headers: Vec::new(),
        });
        let mut request_head = head("/api/widgets");
        apply_rewrite(&endpoint, &mut request_head);
        assert_eq!(request_head.path, "/widgets");
    }

    #[test]
    fn apply_rewrite_falls_back_to_root_when_the_prefix_is_the_whole_path() {
        let endpoint = endpoint_with_rewrite(HttpRewrite {
            strip_prefix: Some("/api".to_string()),
            add_headers: Vec::new(),
        });
        let mut request_head = head("/api");
        apply_rewrite(&endpoint, &mut request_head);
        assert_eq!(request_head.path, "/");
    }

    #[test]
    fn apply_rewrite_overwrites_an_existing_header_and_appends_new_ones() {
        let endpoint = endpoint_with_rewrite(HttpRewrite {
            strip_prefix: None,
            add_headers: vec![
                ("X-Existing".to_string(), "new".to_string()),
                ("X-Added".to_string(), "value".to_string()),
            ],
        });
        let mut request_head = head("/widgets");
        apply_rewrite(&endpoint, &mut request_head);
        assert_eq!(request_head.headers[0], ("X-Existing".to_string(), "new".to_string()));
        assert_eq!(request_head.headers[1], ("X-Added".to_string(), "value".to_string()));
    }

    #[tokio::test]
    async fn write_service_unavailable_emits_a_503_response() {
        let mut buffer = Vec::new();
        write_service_unavailable(&mut buffer).await.unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.ends_with("no healthy backend available\n"));
    }
}
