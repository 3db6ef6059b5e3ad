//! HTTP request: wire-building setters and a resumable parser over one
//! owning cache.
//!
//! The builder appends wire bytes as setters are called, so the cache is
//! byte-identical to the eventual output at every step. The parser consumes
//! bytes appended by the transport layer and remembers how far it has
//! scanned (`cache_scanned`), which makes re-entry after a partial read
//! O(new bytes): feeding a request split at any byte boundary yields the
//! same parse as feeding it whole.

use tethys_net::Buffer;

use crate::error::ParseError;
use crate::wire;

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    method: String,
    url: String,
    protocol: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body_index: usize,
    body_size: usize,
    body_length: usize,
    body_length_provided: bool,
    cache: Buffer,
    /// Largest prefix of the cache already scanned for the separator.
    cache_scanned: usize,
    /// Scan progress for terminator-delimited bodies.
    body_scanned: usize,
    separator_terminated: bool,
    header_received: bool,
    body_received: bool,
    error: Option<ParseError>,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- builder ----------------------------------------------------

    /// Starts a request over; `METHOD SP URL SP HTTP/1.1 CRLF`.
    pub fn set_begin(&mut self, method: &str, url: &str) -> &mut Self {
        self.set_begin_with_protocol(method, url, "HTTP/1.1")
    }

    pub fn set_begin_with_protocol(&mut self, method: &str, url: &str, protocol: &str) -> &mut Self {
        self.clear();
        self.cache.append_str(method);
        self.cache.append_u8(b' ');
        self.cache.append_str(url);
        self.cache.append_u8(b' ');
        self.cache.append_str(protocol);
        self.cache.append(b"\r\n");
        self.method = method.to_string();
        self.url = url.to_string();
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

    /// Emits a `Cookie: name=value` header line.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> &mut Self {
        let pair = format!("{name}={value}");
        self.set_header("Cookie", &pair);
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    /// Terminates the header block with a `Content-Length` and appends the
    /// body.
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

    /// Declares the body length and terminates the header block; the body
    /// itself follows through [`append_body`](Self::append_body).
    pub fn set_body_length(&mut self, length: usize) -> &mut Self {
        self.set_header("Content-Length", &length.to_string());
        self.cache.append(b"\r\n");
        self.body_index = self.cache.size();
        self.body_length = length;
        self.body_length_provided = true;
        self.header_received = true;
        self
    }

    /// Appends a body chunk after [`set_body_length`](Self::set_body_length).
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

    pub fn make_get_request(url: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("GET", url).set_body(b"");
        request
    }

    pub fn make_head_request(url: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("HEAD", url).set_body(b"");
        request
    }

    pub fn make_post_request(url: &str, content: &[u8], content_type: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("POST", url);
        if !content_type.is_empty() {
            request.set_header("Content-Type", content_type);
        }
        request.set_body(content);
        request
    }

    pub fn make_put_request(url: &str, content: &[u8], content_type: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("PUT", url);
        if !content_type.is_empty() {
            request.set_header("Content-Type", content_type);
        }
        request.set_body(content);
        request
    }

    pub fn make_delete_request(url: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("DELETE", url).set_body(b"");
        request
    }

    pub fn make_options_request(url: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("OPTIONS", url).set_body(b"");
        request
    }

    pub fn make_trace_request(url: &str) -> Self {
        let mut request = Self::new();
        request.set_begin("TRACE", url).set_body(b"");
        request
    }

    // ---- parsed view ------------------------------------------------

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Headers in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matched case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Cookies in wire order.
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
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

    /// Whether a `Content-Length` header declared the body length.
    pub fn body_length_provided(&self) -> bool {
        self.body_length_provided
    }

    /// The wire bytes of this message.
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

    /// Appends incoming bytes and tries to complete the header. Returns
    /// `true` once the header is parsed; on a structural violation the
    /// error flag is set and the result stays `false`.
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

    /// Appends incoming bytes to the body. Returns `true` once the body is
    /// complete under the message's framing.
    pub fn receive_body(&mut self, data: &[u8]) -> bool {
        self.cache.append(data);
        self.update_body_state(false)
    }

    /// The peer closed the connection; an unframed body ends here.
    pub fn set_body_end(&mut self) -> bool {
        self.update_body_state(true)
    }

    fn parse_header_block(&mut self, end: usize) -> Result<(), ParseError> {
        let slice = self.cache.as_slice();

        let line_end = wire::find_crlf(slice, end + 2)
            .ok_or_else(|| ParseError::invalid_start_line("missing request line"))?;
        let start_line = String::from_utf8_lossy(&slice[..line_end]);
        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next().unwrap_or_default();
        let url = parts.next().unwrap_or_default();
        let protocol = parts.next().unwrap_or_default();
        if method.is_empty() || url.is_empty() || protocol.is_empty() {
            return Err(ParseError::invalid_start_line(format!(
                "expected METHOD SP URL SP PROTOCOL, got {start_line:?}"
            )));
        }

        let parsed = wire::parse_header_lines(slice, line_end + 2, end, true)?;

        self.method = method.to_string();
        self.url = url.to_string();
        self.protocol = protocol.to_string();
        self.headers = parsed.headers;
        self.cookies = parsed.cookies;
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
                // truncate to the declared length; anything further belongs
                // to the next message
                self.body_size = self.body_length;
                self.body_received = true;
            } else {
                self.body_size = available;
            }
        } else if method_has_no_body(&self.method) {
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

    /// Wire length of the complete message, excluding any pipelined bytes
    /// that arrived behind it.
    pub(crate) fn consumed_len(&self) -> usize {
        let terminator = if self.separator_terminated { wire::SEPARATOR.len() } else { 0 };
        self.body_index + self.body_size + terminator
    }

    /// Splits off bytes past the message end, for the next message.
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

/// Methods that carry no body unless a `Content-Length` says otherwise.
pub(crate) fn method_has_no_body(method: &str) -> bool {
    matches!(method, "HEAD" | "GET" | "DELETE" | "OPTIONS" | "TRACE")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> HttpRequest {
        let mut request = HttpRequest::new();
        request.receive_header(bytes);
        request
    }

    #[test]
    fn simple_get() {
        let request = parse(b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(!request.is_error_set());
        assert_eq!(request.method(), "GET");
        assert_eq!(request.url(), "/index");
        assert_eq!(request.protocol(), "HTTP/1.1");
        assert_eq!(request.headers(), &[("Host".to_string(), "x".to_string())]);
        assert_eq!(request.body_length(), 0);
        assert!(!request.body_length_provided());
        assert!(request.is_body_complete());
        assert!(request.body().is_empty());
    }

    #[test]
    fn post_split_mid_body() {
        let mut request = HttpRequest::new();
        let done = request.receive_header(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel");
        assert!(done);
        assert!(request.is_pending_body());
        assert_eq!(request.body_size, 3);

        assert!(request.receive_body(b"lo"));
        assert_eq!(request.body_size, 5);
        assert_eq!(request.body_as_string(), "hello");
        assert!(!request.is_pending_body());
    }

    #[test]
    fn every_split_point_parses_identically() {
        let wire_bytes = b"POST /submit HTTP/1.1\r\nHost: example\r\nCookie: a=1; b=2\r\nContent-Length: 4\r\n\r\nwire";
        let whole = {
            let mut request = HttpRequest::new();
            assert!(request.receive_header(wire_bytes));
            assert!(request.is_body_complete());
            request
        };

        for split in 0..wire_bytes.len() {
            let mut request = HttpRequest::new();
            let scanned_before;
            if request.receive_header(&wire_bytes[..split]) {
                scanned_before = request.cache_scanned;
                request.receive_body(&wire_bytes[split..]);
            } else {
                scanned_before = request.cache_scanned;
                request.receive_header(&wire_bytes[split..]);
            }
            assert!(request.cache_scanned >= scanned_before, "monotone scan at {split}");
            assert!(request.is_body_complete(), "split at {split}");
            assert_eq!(request.method(), whole.method());
            assert_eq!(request.url(), whole.url());
            assert_eq!(request.headers(), whole.headers());
            assert_eq!(request.cookies(), whole.cookies());
            assert_eq!(request.body(), whole.body());
        }
    }

    #[test]
    fn cookie_whitespace_variants() {
        let request = parse(b"GET / HTTP/1.1\r\nCookie: a=1; b=2 ;c=3\r\n\r\n");
        let expected: Vec<(String, String)> = [("a", "1"), ("b", "2"), ("c", "3")]
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        assert_eq!(request.cookies(), expected.as_slice());
    }

    #[test]
    fn empty_header_name_sets_error() {
        let request = parse(b"GET / HTTP/1.1\r\n: bogus\r\n\r\n");
        assert!(request.is_error_set());
        assert!(request.is_pending_header());
    }

    #[test]
    fn empty_header_value_is_accepted() {
        let request = parse(b"GET / HTTP/1.1\r\nAccept:\r\n\r\n");
        assert!(!request.is_error_set());
        assert_eq!(request.header_value("accept"), Some(""));
    }

    #[test]
    fn malformed_content_length_sets_error() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: 12a\r\n\r\n");
        assert!(request.is_error_set());
    }

    #[test]
    fn builder_round_trip() {
        let built = HttpRequest::make_post_request("/echo", b"payload", "text/plain");
        let reparsed = parse(built.cache());

        assert!(!reparsed.is_error_set());
        assert_eq!(reparsed.method(), built.method());
        assert_eq!(reparsed.url(), built.url());
        assert_eq!(reparsed.protocol(), built.protocol());
        assert_eq!(reparsed.headers(), built.headers());
        assert_eq!(reparsed.body(), built.body());
        assert_eq!(reparsed.body_length(), built.body_length());
        assert!(reparsed.body_length_provided());
    }

    #[test]
    fn builder_cookie_round_trip() {
        let mut built = HttpRequest::new();
        built.set_begin("GET", "/profile").set_cookie("sid", "abc123").set_body(b"");

        let reparsed = parse(built.cache());
        assert_eq!(reparsed.cookies(), built.cookies());
        assert_eq!(reparsed.header_value("cookie"), Some("sid=abc123"));
    }

    #[test]
    fn pipelined_excess_is_split_off() {
        let mut request = HttpRequest::new();
        request.receive_header(b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET /next");
        assert!(request.is_body_complete());
        assert_eq!(request.body(), b"ok");
        assert_eq!(request.take_excess(), b"GET /next".to_vec());
        assert_eq!(request.cache().len(), request.consumed_len());
    }

    #[test]
    fn unframed_post_terminates_on_separator() {
        let mut request = HttpRequest::new();
        request.receive_header(b"POST /a HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(request.is_pending_body());
        request.receive_body(b"line1\r\n");
        assert!(request.is_pending_body());
        assert!(request.receive_body(b"\r\n"));
        assert_eq!(request.body(), b"line1");
    }

    #[test]
    fn unframed_post_terminates_on_eof() {
        let mut request = HttpRequest::new();
        request.receive_header(b"POST /a HTTP/1.1\r\nHost: x\r\n\r\n");
        request.receive_body(b"partial");
        assert!(request.is_pending_body());
        assert!(request.set_body_end());
        assert_eq!(request.body(), b"partial");
    }
}
