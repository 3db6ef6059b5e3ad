//! RFC 6455 opening handshake, built on the HTTP message codec.
//!
//! The server proves it understood the upgrade by echoing
//! `base64(sha1(key ++ GUID))`; the client verifies the echo against the
//! nonce it sent. Both sides exchange ordinary HTTP/1.1 messages, so the
//! upgrade rides the same incremental parser as everything else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use tethys_http::{HttpRequest, HttpResponse};

use crate::error::WsError;

/// The magic GUID of RFC 6455 section 1.3.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const WS_VERSION: &str = "13";

/// Generates a fresh `Sec-WebSocket-Key`: base64 of a random 16-byte nonce.
pub fn generate_sec_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// Derives `Sec-WebSocket-Accept` from a `Sec-WebSocket-Key`.
pub fn derive_accept_key(sec_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(sec_key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}

/// Builds the client's upgrade request.
pub fn make_upgrade_request(host: &str, target: &str, sec_key: &str) -> HttpRequest {
    let mut request = HttpRequest::new();
    request
        .set_begin("GET", target)
        .set_header("Host", host)
        .set_header("Upgrade", "websocket")
        .set_header("Connection", "Upgrade")
        .set_header("Sec-WebSocket-Key", sec_key)
        .set_header("Sec-WebSocket-Version", WS_VERSION)
        .set_body(b"");
    request
}

/// Validates a server-side upgrade request; returns the client's key.
pub fn validate_upgrade_request(request: &HttpRequest) -> Result<String, WsError> {
    if !request.method().eq_ignore_ascii_case("GET") {
        return Err(WsError::handshake(format!("upgrade must be GET, got {}", request.method())));
    }

    let upgrade = request.header_value("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(WsError::handshake(format!("Upgrade header is {upgrade:?}")));
    }

    let connection = request.header_value("Connection").unwrap_or_default();
    let mentions_upgrade =
        connection.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !mentions_upgrade {
        return Err(WsError::handshake(format!("Connection header is {connection:?}")));
    }

    let version = request.header_value("Sec-WebSocket-Version").unwrap_or_default();
    if version != WS_VERSION {
        return Err(WsError::handshake(format!("unsupported version {version:?}")));
    }

    match request.header_value("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(WsError::handshake("missing Sec-WebSocket-Key")),
    }
}

/// Builds the server's `101 Switching Protocols` answer to a validated key.
pub fn make_upgrade_response(sec_key: &str) -> HttpResponse {
    let mut response = HttpResponse::new();
    response
        .set_begin(101)
        .set_header("Connection", "Upgrade")
        .set_header("Upgrade", "websocket")
        .set_header("Sec-WebSocket-Accept", &derive_accept_key(sec_key))
        .set_body(b"");
    response
}

/// Validates the server's answer against the key this client sent.
pub fn validate_upgrade_response(response: &HttpResponse, sec_key: &str) -> Result<(), WsError> {
    if response.status() != 101 {
        return Err(WsError::handshake(format!("expected status 101, got {}", response.status())));
    }
    let expected = derive_accept_key(sec_key);
    match response.header_value("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(()),
        Some(accept) => {
            Err(WsError::handshake(format!("accept key mismatch: {accept:?} != {expected:?}")))
        }
        None => Err(WsError::handshake("missing Sec-WebSocket-Accept")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the worked example of RFC 6455 section 1.3
    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    #[test]
    fn rfc_sample_accept_key() {
        assert_eq!(derive_accept_key(SAMPLE_KEY), SAMPLE_ACCEPT);
    }

    #[test]
    fn generated_keys_are_unique_base64() {
        let first = generate_sec_key();
        let second = generate_sec_key();
        assert_ne!(first, second);
        assert_eq!(BASE64.decode(&first).unwrap().len(), 16);
    }

    #[test]
    fn request_response_round_trip() {
        let request = make_upgrade_request("example.com", "/chat", SAMPLE_KEY);
        let key = validate_upgrade_request(&request).unwrap();
        assert_eq!(key, SAMPLE_KEY);

        let response = make_upgrade_response(&key);
        assert_eq!(response.status(), 101);
        assert_eq!(response.status_phrase(), "Switching Protocols");
        validate_upgrade_response(&response, SAMPLE_KEY).unwrap();
    }

    #[test]
    fn connection_header_token_list() {
        let mut request = make_upgrade_request("example.com", "/chat", SAMPLE_KEY);
        request.clear();
        request
            .set_begin("GET", "/chat")
            .set_header("Host", "example.com")
            .set_header("Upgrade", "WebSocket")
            .set_header("Connection", "keep-alive, Upgrade")
            .set_header("Sec-WebSocket-Key", SAMPLE_KEY)
            .set_header("Sec-WebSocket-Version", "13")
            .set_body(b"");
        validate_upgrade_request(&request).unwrap();
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut request = HttpRequest::new();
        request
            .set_begin("GET", "/chat")
            .set_header("Upgrade", "websocket")
            .set_header("Connection", "Upgrade")
            .set_header("Sec-WebSocket-Key", SAMPLE_KEY)
            .set_header("Sec-WebSocket-Version", "8")
            .set_body(b"");
        assert!(validate_upgrade_request(&request).is_err());
    }

    #[test]
    fn tampered_accept_is_rejected() {
        let mut response = HttpResponse::new();
        response
            .set_begin(101)
            .set_header("Upgrade", "websocket")
            .set_header("Sec-WebSocket-Accept", "bm90IHRoZSByaWdodCBrZXk=")
            .set_body(b"");
        assert!(validate_upgrade_response(&response, SAMPLE_KEY).is_err());
    }
}
