//! The Authorizing Egress Proxy: an HTTP/CONNECT forward proxy that only
//! sandboxed containers can reach, gating every new destination domain
//! against a per-session allowlist before letting traffic through.
//!
//! Grounded on the original reference implementation's `ProxyServer`:
//! `Proxy-Authorization: Basic base64(token:)` identifies the calling
//! session; `CONNECT` tunnels are relayed byte-for-byte once authorized;
//! plain absolute-URI HTTP requests are re-issued to the origin. A first
//! request to an unapproved domain blocks (up to 120s) on a round-trip
//! approval request before timing out to a denial.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::sandbox::{domain_matches, DomainDecision, SandboxManager};

use super::pending::PendingApprovals;

const RELAY_BUF_SIZE: usize = 32 * 1024;
const HEADER_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

const CONNECT_OK: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const FORBIDDEN_RESPONSE: &[u8] =
    b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Notified when the proxy needs a user decision on a new domain. Implemented
/// by the User Channel layer, which routes the request to whichever
/// connection owns the session and awaits the reply out-of-band.
#[async_trait]
pub trait ProxyApprovalNotifier: Send + Sync {
    async fn notify_domain_approval(
        &self,
        session_id: &str,
        request_id: &str,
        domain: &str,
        command: Option<&str>,
    );
}

pub struct ProxyServer {
    manager: Arc<SandboxManager>,
    notifier: Arc<dyn ProxyApprovalNotifier>,
    pending: PendingApprovals,
    bind_addr: String,
}

impl ProxyServer {
    pub fn new(manager: Arc<SandboxManager>, notifier: Arc<dyn ProxyApprovalNotifier>, bind_addr: String) -> Self {
        Self { manager, notifier, pending: PendingApprovals::new(), bind_addr }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "egress proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_client(stream).await {
                    tracing::debug!(%peer, error = %e, "proxy connection ended with error");
                }
            });
        }
    }

    async fn handle_client(&self, mut stream: TcpStream) -> Result<(), ProxyError> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        let request_line = match timeout(HEADER_TIMEOUT, read_line(&mut reader)).await {
            Ok(Ok(Some(line))) => line,
            _ => {
                let _ = writer.write_all(BAD_REQUEST).await;
                return Err(ProxyError::BadRequest);
            }
        };

        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(ProxyError::BadRequest)?.to_string();
        let target = parts.next().ok_or(ProxyError::BadRequest)?.to_string();

        let headers = match timeout(HEADER_TIMEOUT, read_headers(&mut reader)).await {
            Ok(Ok(headers)) => headers,
            _ => {
                let _ = writer.write_all(BAD_REQUEST).await;
                return Err(ProxyError::BadRequest);
            }
        };

        let proxy_token = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("proxy-authorization"))
            .and_then(|(_, v)| extract_basic_token(v));

        let session_id = match proxy_token {
            Some(token) => match self.manager.session_by_proxy_token(&token).await {
                Some(id) => id,
                None => {
                    let _ = writer.write_all(FORBIDDEN_RESPONSE).await;
                    return Err(ProxyError::Unauthorized);
                }
            },
            None => {
                let _ = writer.write_all(FORBIDDEN_RESPONSE).await;
                return Err(ProxyError::Unauthorized);
            }
        };

        if method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(&session_id, &target, reader, writer).await
        } else {
            self.handle_http(&session_id, &method, &target, &headers, reader, writer).await
        }
    }

    async fn handle_connect<R, W>(
        &self,
        session_id: &str,
        target: &str,
        mut client_reader: R,
        mut client_writer: W,
    ) -> Result<(), ProxyError>
    where
        R: AsyncReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let (host, port) = parse_host_port(target, 443).ok_or(ProxyError::BadRequest)?;

        let command = self.manager.current_command(session_id).await;
        if !self.authorize_domain(session_id, &host, command.as_deref()).await {
            let _ = client_writer.write_all(FORBIDDEN_RESPONSE).await;
            return Err(ProxyError::DomainBlocked);
        }

        let upstream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(stream)) => stream,
            _ => {
                let _ = client_writer.write_all(BAD_GATEWAY).await;
                return Err(ProxyError::BadGateway(format!("{host}:{port}")));
            }
        };

        client_writer.write_all(CONNECT_OK).await?;

        let (mut upstream_reader, mut upstream_writer) = tokio::io::split(upstream);
        let client_to_upstream = tokio::io::copy(&mut client_reader, &mut upstream_writer);
        let upstream_to_client = tokio::io::copy(&mut upstream_reader, &mut client_writer);

        // Broken pipes are expected at connection teardown and swallowed.
        let _ = tokio::join!(client_to_upstream, upstream_to_client);
        Ok(())
    }

    async fn handle_http<R, W>(
        &self,
        session_id: &str,
        method: &str,
        target: &str,
        headers: &[(String, String)],
        mut client_reader: R,
        mut client_writer: W,
    ) -> Result<(), ProxyError>
    where
        R: AsyncReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        let (host, port, path) = parse_absolute_url(target).ok_or(ProxyError::BadRequest)?;

        let command = self.manager.current_command(session_id).await;
        if !self.authorize_domain(session_id, &host, command.as_deref()).await {
            let _ = client_writer.write_all(FORBIDDEN_RESPONSE).await;
            return Err(ProxyError::DomainBlocked);
        }

        let mut upstream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(stream)) => stream,
            _ => {
                let _ = client_writer.write_all(BAD_GATEWAY).await;
                return Err(ProxyError::BadGateway(format!("{host}:{port}")));
            }
        };

        let mut request = format!("{method} {path} HTTP/1.1\r\n");
        for (key, value) in headers {
            if key.eq_ignore_ascii_case("proxy-authorization") || key.eq_ignore_ascii_case("proxy-connection") {
                continue;
            }
            request.push_str(&format!("{key}: {value}\r\n"));
        }
        request.push_str("\r\n");
        upstream.write_all(request.as_bytes()).await?;

        // Forward any remaining client body bytes (best effort; short bodies only).
        let mut body_buf = [0u8; RELAY_BUF_SIZE];
        if let Ok(n) = timeout(Duration::from_millis(50), client_reader.read(&mut body_buf)).await.unwrap_or(Ok(0)) {
            if n > 0 {
                upstream.write_all(&body_buf[..n]).await?;
            }
        }

        let (mut upstream_reader, mut upstream_writer) = upstream.split();
        let _ = upstream_writer.shutdown().await;
        tokio::io::copy(&mut upstream_reader, &mut client_writer).await?;
        Ok(())
    }

    /// Returns `true` if `domain` is already allowed, or the user approves
    /// it within the approval timeout.
    async fn authorize_domain(&self, session_id: &str, domain: &str, command: Option<&str>) -> bool {
        if self.manager.is_domain_allowed(session_id, domain).await {
            return true;
        }

        let request_id = Uuid::new_v4().to_string();
        let receiver = self.pending.register(session_id.to_string(), request_id.clone()).await;
        self.notifier.notify_domain_approval(session_id, &request_id, domain, command).await;

        let decision = match timeout(APPROVAL_TIMEOUT, receiver).await {
            Ok(Ok(decision)) => decision,
            _ => {
                self.pending.remove(&request_id).await;
                DomainDecision::Deny
            }
        };

        self.manager.authorize_domain(session_id, domain, decision).await;
        self.manager.is_domain_allowed(session_id, domain).await
    }

    pub fn pending_approvals(&self) -> PendingApprovals {
        self.pending.clone()
    }
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn read_headers<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    loop {
        match read_line(reader).await? {
            Some(line) if line.is_empty() => break,
            Some(line) => {
                if let Some((key, value)) = line.split_once(':') {
                    headers.push((key.trim().to_string(), value.trim().to_string()));
                }
            }
            None => break,
        }
    }
    Ok(headers)
}

fn extract_basic_token(header_value: &str) -> Option<String> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    text.split_once(':').map(|(user, _)| user.to_string()).or(Some(text))
}

/// Parse `host[:port]` as used in a `CONNECT host:port` request line.
fn parse_host_port(target: &str, default_port: u16) -> Option<(String, u16)> {
    if let Some((host, port)) = target.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return Some((host.to_string(), port));
        }
    }
    Some((target.to_string(), default_port))
}

/// Parse `http://host[:port]/path` as used in absolute-form HTTP requests.
fn parse_absolute_url(target: &str) -> Option<(String, u16, String)> {
    let rest = target.strip_prefix("http://")?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = parse_host_port(authority, 80)?;
    Some((host, port, if path.is_empty() { "/".to_string() } else { path.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_explicit_port() {
        assert_eq!(parse_host_port("example.com:8443", 443), Some(("example.com".to_string(), 8443)));
    }

    #[test]
    fn parse_host_port_defaults() {
        assert_eq!(parse_host_port("example.com", 443), Some(("example.com".to_string(), 443)));
    }

    #[test]
    fn parse_absolute_url_with_path() {
        let (host, port, path) = parse_absolute_url("http://example.com:8080/a/b").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 8080);
        assert_eq!(path, "/a/b");
    }

    #[test]
    fn parse_absolute_url_without_path() {
        let (host, port, path) = parse_absolute_url("http://example.com").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
        assert_eq!(path, "/");
    }

    #[test]
    fn extract_basic_token_decodes_username() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode("tok123:");
        let header = format!("Basic {encoded}");
        assert_eq!(extract_basic_token(&header), Some("tok123".to_string()));
    }

    #[test]
    fn domain_pattern_helper_reexported() {
        assert!(domain_matches("a.example.com", "*.example.com"));
    }
}
