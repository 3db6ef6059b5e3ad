//! HTTP response: builder and resumable parser, symmetric to the request
//! side.
//!
//! The status line is `PROTOCOL SP STATUS SP PHRASE`; status bytes must be
//! ASCII digits. Responses without a declared `Content-Length` frame their
//! body with a trailing CRLFCRLF or with the peer close, except statuses
//! that can never carry one (1xx, 204, 304), which complete at the header
//! end; that is what lets an upgrade handshake act on `101` immediately.

use tethys_net::Buffer;

use crate::cookie::CookieOptions;
use crate::error::ParseError;
use crate::mime::content_type_for_extension;
use crate::wire;

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    status: u16,
    status_phrase: String,
    protocol: String,
    headers: Vec<(String, String)>,
    body_index: usize,
    body_size: usize,
    body_length: usize,
    body_length_provided: bool,
    cache: Buffer,
    cache_scanned: usize,
    body_scanned: usize,
    separator_terminated: bool,
    header_received: bool,
    body_received: bool,
    error: Option<ParseError>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- builder ----------------------------------------------------

    /// Starts a response over with the default phrase for `status`.
    pub fn set_begin(&mut self, status: u16) -> &mut Self {
        let phrase = default_phrase(status).to_string();
        self.set_begin_with_phrase(status, &phrase, "HTTP/1.1")
    }

    pub fn set_begin_with_phrase(&mut self, status: u16, phrase: &str, protocol: &str) -> &mut Self {
        self.clear();
        self.cache.append_str(protocol);
        self.cache.append_u8(b' ');
        self.cache.append_str(&status.to_string());
        self.cache.append_u8(b' ');
        self.cache.append_str(phrase);
        self.cache.append(b"\r\n");
        self.status = status;
        self.status_phrase = phrase.to_string();
        self.protocol = protocol.to_string();
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.cache.append_str(name);
        self.cache.append(b": ");
        self.cache.append_str(value);
        self.cache.append(b"\r\n");
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Emits a `Set-Cookie` header with the standard attribute tail.
    pub fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> &mut Self {
        let mut header_value = format!("{name}={value}");
        options.format(&mut header_value);
        self.set_header("Set-Cookie", &header_value)
    }

    /// Sets `Content-Type` from a file extension, when it is a known one.
    pub fn set_content_type_by_extension(&mut self, extension: &str) -> &mut Self {
        if let Some(content_type) = content_type_for_extension(extension) {
            self.set_header("Content-Type", content_type);
        }
        self
    }

    pub fn set_body(&mut self, body: &[u8]) -> &mut Self {
        self.set_body_length(body.len());
        self.cache.append(body);
        self.body_size = body.len();
        self.body_received = true;
        self
    }

    pub fn set_body_str(&mut self, body: &str) -> &mut Self {
        self.set_body(body.as_bytes())
    }

    pub fn set_body_length(&mut self, length: usize) -> &mut Self {
        self.set_header("Content-Length", &length.to_string());
        self.cache.append(b"\r\n");
        self.body_index = self.cache.size();
        self.body_length = length;
        self.body_length_provided = true;
        self.header_received = true;
        self
    }

    pub fn append_body(&mut self, chunk: &[u8]) -> &mut Self {
        self.cache.append(chunk);
        self.body_size = self.cache.size() - self.body_index;
        if self.body_size >= self.body_length {
            self.body_received = true;
        }
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    // ---- presets ----------------------------------------------------

    pub fn make_ok_response() -> Self {
        let mut response = Self::new();
        response.set_begin(200).set_body(b"");
        response
    }

    pub fn make_error_response(status: u16, content: &str) -> Self {
        let mut response = Self::new();
        response.set_begin(status);
        response.set_header("Content-Type", "text/plain; charset=UTF-8");
        response.set_body(content.as_bytes());
        response
    }

    pub fn make_head_response() -> Self {
        let mut response = Self::new();
        response.set_begin(200).set_body(b"");
        response
    }

    pub fn make_get_response(content: &[u8], content_type: &str) -> Self {
        let mut response = Self::new();
        response.set_begin(200);
        if !content_type.is_empty() {
            response.set_header("Content-Type", content_type);
        }
        response.set_body(content);
        response
    }

    pub fn make_options_response(allow: &str) -> Self {
        let mut response = Self::new();
        response.set_begin(200);
        response.set_header("Allow", allow);
        response.set_body(b"");
        response
    }

    /// Reflects the request wire bytes, `message/http` framed.
    pub fn make_trace_response(request: &[u8]) -> Self {
        let mut response = Self::new();
        response.set_begin(200);
        response.set_header("Content-Type", "message/http");
        response.set_body(request);
        response
    }

    // ---- parsed view ------------------------------------------------

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_phrase(&self) -> &str {
        &self.status_phrase
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        self.cache.slice(self.body_index, self.body_size)
    }

    pub fn body_as_string(&self) -> String {
        self.cache.extract_string(self.body_index, self.body_size)
    }

    pub fn body_length(&self) -> usize {
        self.body_length
    }

    pub fn body_length_provided(&self) -> bool {
        self.body_length_provided
    }

    pub fn cache(&self) -> &[u8] {
        self.cache.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.size() == 0
    }

    pub fn is_error_set(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    pub fn is_pending_header(&self) -> bool {
        !self.header_received
    }

    pub fn is_pending_body(&self) -> bool {
        self.header_received && !self.body_received
    }

    pub fn is_body_complete(&self) -> bool {
        self.body_received
    }

    // ---- incremental parser -----------------------------------------

    pub fn receive_header(&mut self, data: &[u8]) -> bool {
        self.cache.append(data);
        if self.header_received {
            return true;
        }
        if self.is_error_set() {
            return false;
        }

        let scan_from = self.cache_scanned.saturating_sub(3);
        let separator = wire::find_separator(self.cache.as_slice(), scan_from);
        self.cache_scanned = self.cache.size();

        let Some(end) = separator else {
            return false;
        };

        if let Err(error) = self.parse_header_block(end) {
            self.error = Some(error);
            return false;
        }

        self.header_received = true;
        self.body_index = end + wire::SEPARATOR.len();
        self.body_scanned = self.body_index;
        self.update_body_state(false);
        true
    }

    pub fn receive_body(&mut self, data: &[u8]) -> bool {
        self.cache.append(data);
        self.update_body_state(false)
    }

    pub fn set_body_end(&mut self) -> bool {
        self.update_body_state(true)
    }

    fn parse_header_block(&mut self, end: usize) -> Result<(), ParseError> {
        let slice = self.cache.as_slice();

        let line_end = wire::find_crlf(slice, end + 2)
            .ok_or_else(|| ParseError::invalid_start_line("missing status line"))?;
        let start_line = String::from_utf8_lossy(&slice[..line_end]);
        let mut parts = start_line.splitn(3, ' ');
        let protocol = parts.next().unwrap_or_default();
        let status_text = parts.next().unwrap_or_default();
        let phrase = parts.next().unwrap_or_default();
        if protocol.is_empty() || status_text.is_empty() {
            return Err(ParseError::invalid_start_line(format!(
                "expected PROTOCOL SP STATUS SP PHRASE, got {start_line:?}"
            )));
        }
        if !status_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::invalid_status(format!("non-digit in {status_text:?}")));
        }
        let status = status_text
            .parse::<u16>()
            .map_err(|_| ParseError::invalid_status(format!("out of range: {status_text}")))?;

        let parsed = wire::parse_header_lines(slice, line_end + 2, end, false)?;

        self.protocol = protocol.to_string();
        self.status = status;
        self.status_phrase = phrase.to_string();
        self.headers = parsed.headers;
        if let Some(length) = parsed.body_length {
            self.body_length = length;
            self.body_length_provided = true;
        }
        Ok(())
    }

    fn update_body_state(&mut self, eof: bool) -> bool {
        if !self.header_received || self.body_received {
            return self.body_received;
        }

        let available = self.cache.size() - self.body_index;
        if self.body_length_provided {
            if available >= self.body_length {
                self.body_size = self.body_length;
                self.body_received = true;
            } else {
                self.body_size = available;
            }
        } else if status_has_no_body(self.status) {
            self.body_size = 0;
            self.body_received = true;
        } else {
            let scan_from = self.body_scanned.saturating_sub(3).max(self.body_index);
            match wire::find_separator(self.cache.as_slice(), scan_from) {
                Some(end) if end >= self.body_index => {
                    self.body_size = end - self.body_index;
                    self.separator_terminated = true;
                    self.body_received = true;
                }
                _ => {
                    self.body_size = available;
                    self.body_scanned = self.cache.size();
                    if eof {
                        self.body_received = true;
                    }
                }
            }
        }
        self.body_received
    }

    pub(crate) fn consumed_len(&self) -> usize {
        let terminator = if self.separator_terminated { wire::SEPARATOR.len() } else { 0 };
        self.body_index + self.body_size + terminator
    }

    pub(crate) fn take_excess(&mut self) -> Vec<u8> {
        let consumed = self.consumed_len();
        if self.cache.size() <= consumed {
            return Vec::new();
        }
        let excess = self.cache.slice(consumed, self.cache.size() - consumed).to_vec();
        self.cache.truncate(consumed);
        excess
    }
}

/// Statuses that never carry a body (RFC 7230 section 3.3.3).
fn status_has_no_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

fn default_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> HttpResponse {
        let mut response = HttpResponse::new();
        response.receive_header(bytes);
        response
    }

    #[test]
    fn simple_ok() {
        let response = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        assert!(!response.is_error_set());
        assert_eq!(response.status(), 200);
        assert_eq!(response.status_phrase(), "OK");
        assert_eq!(response.protocol(), "HTTP/1.1");
        assert_eq!(response.body_as_string(), "hi");
        assert!(response.is_body_complete());
    }

    #[test]
    fn multiword_phrase() {
        let response = parse(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(response.status_phrase(), "Internal Server Error");
    }

    #[test]
    fn non_digit_status_sets_error() {
        let response = parse(b"HTTP/1.1 2OO OK\r\n\r\n");
        assert!(response.is_error_set());
    }

    #[test]
    fn switching_protocols_completes_at_header_end() {
        let response = parse(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n");
        assert!(!response.is_error_set());
        assert!(response.is_body_complete());
        assert!(response.body().is_empty());
    }

    #[test]
    fn unframed_body_ends_on_peer_close() {
        let mut response = HttpResponse::new();
        response.receive_header(b"HTTP/1.1 200 OK\r\nServer: t\r\n\r\nstream");
        assert!(response.is_pending_body());
        response.receive_body(b"ing");
        assert!(response.set_body_end());
        assert_eq!(response.body_as_string(), "streaming");
    }

    #[test]
    fn builder_round_trip() {
        let built = HttpResponse::make_get_response(b"<h1>hi</h1>", "text/html");
        let reparsed = parse(built.cache());

        assert!(!reparsed.is_error_set());
        assert_eq!(reparsed.status(), built.status());
        assert_eq!(reparsed.status_phrase(), built.status_phrase());
        assert_eq!(reparsed.protocol(), built.protocol());
        assert_eq!(reparsed.headers(), built.headers());
        assert_eq!(reparsed.body(), built.body());
    }

    #[test]
    fn is_empty_means_empty_cache() {
        let response = HttpResponse::new();
        assert!(response.is_empty());
        assert!(!HttpResponse::make_ok_response().is_empty());
    }

    #[test]
    fn set_cookie_attributes() {
        let mut response = HttpResponse::new();
        response.set_begin(200);
        response.set_cookie("sid", "42", &CookieOptions::default());
        response.set_body(b"");
        assert_eq!(
            response.header_value("set-cookie"),
            Some("sid=42; Max-Age=86400; Secure; SameSite=Strict; HttpOnly")
        );
    }

    #[test]
    fn content_type_from_extension() {
        let mut response = HttpResponse::new();
        response.set_begin(200);
        response.set_content_type_by_extension(".json");
        response.set_body(b"{}");
        assert_eq!(response.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn error_response_preset() {
        let response = HttpResponse::make_error_response(404, "missing");
        let reparsed = parse(response.cache());
        assert_eq!(reparsed.status(), 404);
        assert_eq!(reparsed.status_phrase(), "Not Found");
        assert_eq!(reparsed.body_as_string(), "missing");
    }
}
