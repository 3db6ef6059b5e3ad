//! `tokio_util` decoders that drive the incremental message parsers.
//!
//! The decoders drain everything the transport hands them into the
//! in-progress message's cache and yield the message once its framing says
//! it is complete. Bytes past the end of a complete message (pipelined
//! traffic, or frame data behind an upgrade response) are pushed back to
//! the front of `src` for whatever parses next. After a yield the decoder
//! re-arms with a fresh message, which is what keep-alive continuation is.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::error::ParseError;
use crate::request::HttpRequest;
use crate::response::HttpResponse;

#[derive(Debug, Default)]
pub struct RequestCodec {
    message: HttpRequest,
}

impl RequestCodec {
    pub fn new() -> Self {
        Default::default()
    }

    /// The partially parsed in-flight message.
    pub fn message(&self) -> &HttpRequest {
        &self.message
    }
}

impl Decoder for RequestCodec {
    type Item = HttpRequest;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split_to(src.len());
            if self.message.is_pending_header() {
                self.message.receive_header(&chunk);
            } else {
                self.message.receive_body(&chunk);
            }
        }

        if let Some(error) = self.message.error() {
            return Err(error.clone());
        }
        if self.message.is_pending_header() || !self.message.is_body_complete() {
            return Ok(None);
        }

        push_back(src, self.message.take_excess());
        Ok(Some(std::mem::take(&mut self.message)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if !self.message.is_pending_header()
            && !self.message.body_length_provided()
            && self.message.set_body_end()
        {
            push_back(src, self.message.take_excess());
            return Ok(Some(std::mem::take(&mut self.message)));
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct ResponseCodec {
    message: HttpResponse,
}

impl ResponseCodec {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn message(&self) -> &HttpResponse {
        &self.message
    }
}

impl Decoder for ResponseCodec {
    type Item = HttpResponse;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split_to(src.len());
            if self.message.is_pending_header() {
                self.message.receive_header(&chunk);
            } else {
                self.message.receive_body(&chunk);
            }
        }

        if let Some(error) = self.message.error() {
            return Err(error.clone());
        }
        if self.message.is_pending_header() || !self.message.is_body_complete() {
            return Ok(None);
        }

        push_back(src, self.message.take_excess());
        Ok(Some(std::mem::take(&mut self.message)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if !self.message.is_pending_header()
            && !self.message.body_length_provided()
            && self.message.set_body_end()
        {
            push_back(src, self.message.take_excess());
            return Ok(Some(std::mem::take(&mut self.message)));
        }
        Ok(None)
    }
}

fn push_back(src: &mut BytesMut, excess: Vec<u8>) {
    if excess.is_empty() {
        return;
    }
    let mut rebuilt = BytesMut::with_capacity(excess.len() + src.len());
    rebuilt.extend_from_slice(&excess);
    rebuilt.extend_from_slice(src);
    *src = rebuilt;
}
