//! Opening handshake (RFC 6455 Section 4.1): request construction and response validation.
use base64::prelude::*;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{header, Request, Response, StatusCode};
use sha1::{Digest, Sha1};
use url::Url;

use crate::{Result, WebSocketError};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub(crate) fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Computes the `Sec-WebSocket-Accept` value expected for `key`:
/// base64(SHA-1(key + GUID)).
pub fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Builds the upgrade request for `url`.
///
/// The request target is the URL path plus query. The `Host` header carries the port
/// only when the URL spells it out.
pub(crate) fn request(url: &Url, key: &str) -> Result<Request<Empty<Bytes>>> {
    let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let target = &url[url::Position::BeforePath..];

    let req = Request::builder()
        .method("GET")
        .uri(target)
        .header(header::HOST, host_header)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key)
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(Empty::new())?;

    Ok(req)
}

/// Validates the server's answer to the upgrade request carrying `key`.
pub(crate) fn verify<B>(response: &Response<B>, key: &str) -> Result<()> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(
            response.status().as_u16(),
        ));
    }

    let headers = response.headers();

    if !headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if !headers
        .get(header::CONNECTION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("upgrade"))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    let expected = accept_key(key.as_bytes());
    if headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .map(|h| h.as_bytes())
        != Some(expected.as_bytes())
    {
        return Err(WebSocketError::InvalidAcceptKey);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn response(status: u16, upgrade: &str, connection: &str, accept: &str) -> Response<()> {
        Response::builder()
            .status(status)
            .header(header::UPGRADE, upgrade)
            .header(header::CONNECTION, connection)
            .header(header::SEC_WEBSOCKET_ACCEPT, accept)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(accept_key(KEY.as_bytes()), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_verify_accepts_case_insensitive_headers() {
        let accept = accept_key(KEY.as_bytes());
        assert!(verify(&response(101, "WebSocket", "UPGRADE", &accept), KEY).is_ok());
    }

    #[test]
    fn test_verify_rejections() {
        let accept = accept_key(KEY.as_bytes());

        assert!(matches!(
            verify(&response(200, "websocket", "upgrade", &accept), KEY),
            Err(WebSocketError::InvalidStatusCode(200))
        ));
        assert!(matches!(
            verify(&response(101, "h2c", "upgrade", &accept), KEY),
            Err(WebSocketError::InvalidUpgradeHeader)
        ));
        assert!(matches!(
            verify(&response(101, "websocket", "keep-alive", &accept), KEY),
            Err(WebSocketError::InvalidConnectionHeader)
        ));
        assert!(matches!(
            verify(&response(101, "websocket", "upgrade", "bm9wZQ=="), KEY),
            Err(WebSocketError::InvalidAcceptKey)
        ));
    }

    #[test]
    fn test_request_layout() {
        let url: Url = "ws://example.com:8080/chat?room=1".parse().unwrap();
        let req = request(&url, KEY).unwrap();

        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri(), "/chat?room=1");

        let headers = req.headers();
        assert_eq!(headers[header::HOST], "example.com:8080");
        assert_eq!(headers[header::UPGRADE], "websocket");
        assert_eq!(headers[header::CONNECTION], "Upgrade");
        assert_eq!(headers[header::SEC_WEBSOCKET_KEY], KEY);
        assert_eq!(headers[header::SEC_WEBSOCKET_VERSION], "13");
    }

    #[test]
    fn test_request_host_without_port() {
        let url: Url = "ws://example.com/".parse().unwrap();
        let req = request(&url, KEY).unwrap();
        assert_eq!(req.headers()[header::HOST], "example.com");
        assert_eq!(req.uri(), "/");
    }
}
