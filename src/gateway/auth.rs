//! Bearer token issuance and verification for the REST and WebSocket APIs.
//!
//! Grounded on the original reference implementation's `ensure_token`: a
//! 32-byte URL-safe random token, generated once and persisted to
//! `<data_dir>/server.token`.

use std::path::Path;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use rand::RngCore;

/// Load the server's bearer token from `<data_dir>/server.token`, minting
/// and persisting a new one if it doesn't exist yet.
pub async fn ensure_token(data_dir: &Path) -> std::io::Result<String> {
    let path = data_dir.join("server.token");
    match tokio::fs::read_to_string(&path).await {
        Ok(token) => Ok(token.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let token = generate_token();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &token).await?;
            Ok(token)
        }
        Err(e) => Err(e),
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Axum middleware verifying `Authorization: Bearer <token>` against the
/// server's token.
pub async fn require_bearer_token(
    axum::extract::State(expected): axum::extract::State<String>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// WebSocket auth accepts either a `?token=` query parameter or an
/// `Authorization` header, since browsers can't set custom headers on the
/// handshake request.
pub fn verify_ws_token(expected: &str, query_token: Option<&str>, header_token: Option<&str>) -> bool {
    query_token.is_some_and(|t| t == expected) || header_token.is_some_and(|t| t == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ensure_token_persists_across_calls() {
        let dir = TempDir::new().unwrap();
        let first = ensure_token(dir.path()).await.unwrap();
        let second = ensure_token(dir.path()).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn verify_ws_token_accepts_query_or_header() {
        assert!(verify_ws_token("abc", Some("abc"), None));
        assert!(verify_ws_token("abc", None, Some("abc")));
        assert!(!verify_ws_token("abc", Some("wrong"), None));
    }
}
