//! An HTTP view over a transport session.

use std::net::SocketAddr;

use bytes::Bytes;
use tethys_net::{NetResult, SessionHandle};
use uuid::Uuid;

use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Wraps a connected transport session with message-level send helpers.
/// Responses and requests travel through the transport's FIFO send queue,
/// so ordering and backpressure are inherited unchanged.
#[derive(Debug, Clone)]
pub struct HttpSession {
    transport: SessionHandle,
}

impl HttpSession {
    pub fn new(transport: SessionHandle) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &SessionHandle {
        &self.transport
    }

    pub fn id(&self) -> Uuid {
        self.transport.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.transport.peer_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Sends the response wire bytes and waits for the write.
    pub async fn send_response(&self, response: &HttpResponse) -> NetResult<usize> {
        self.transport.send(Bytes::copy_from_slice(response.cache())).await
    }

    pub fn send_response_async(&self, response: &HttpResponse) -> bool {
        self.transport.send_async(Bytes::copy_from_slice(response.cache()))
    }

    /// Sends the request wire bytes and waits for the write.
    pub async fn send_request(&self, request: &HttpRequest) -> NetResult<usize> {
        self.transport.send(Bytes::copy_from_slice(request.cache())).await
    }

    pub fn send_request_async(&self, request: &HttpRequest) -> bool {
        self.transport.send_async(Bytes::copy_from_slice(request.cache()))
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await
    }
}
