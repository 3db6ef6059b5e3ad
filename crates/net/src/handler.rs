//! Callback seams for transport events.
//!
//! Sessions own a handler object instead of being subclassed: implement the
//! trait, override the events you care about, leave the rest as no-ops.
//! Handlers are shared (`Arc<dyn SessionHandler>`) between every session of
//! a server. A panic inside a handler is caught at the callback seam and
//! surfaced through `on_error`; it never reaches the I/O pump.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::NetError;
use crate::session::SessionHandle;
use crate::udp::UdpHandle;

/// Events of one connected peer (TCP or TLS).
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// The session is about to become connected.
    async fn on_connecting(&self, _session: &SessionHandle) {}

    /// The session is connected and user I/O is permitted.
    async fn on_connected(&self, _session: &SessionHandle) {}

    /// A region of freshly received bytes, borrowed from the session's
    /// receive buffer. Valid only for the duration of the call.
    async fn on_received(&self, _session: &SessionHandle, _data: &[u8]) {}

    /// One OS-level send completed; `pending` is what is still queued.
    async fn on_sent(&self, _session: &SessionHandle, _sent: usize, _pending: usize) {}

    /// The send queue drained completely.
    async fn on_empty(&self, _session: &SessionHandle) {}

    /// The session is about to run its teardown.
    async fn on_disconnecting(&self, _session: &SessionHandle) {}

    /// Teardown finished; the session is terminal.
    async fn on_disconnected(&self, _session: &SessionHandle) {}

    /// A transport, TLS, or handler error. Reported once; the session
    /// disconnects afterwards, it never retries.
    async fn on_error(&self, _session: &SessionHandle, _error: &NetError) {}
}

/// Events of a datagram socket. There is no connection state: every
/// datagram carries its source endpoint and sends name their target.
#[async_trait]
pub trait DatagramHandler: Send + Sync + 'static {
    async fn on_started(&self, _socket: &UdpHandle) {}

    async fn on_received(&self, _socket: &UdpHandle, _peer: SocketAddr, _data: &[u8]) {}

    async fn on_sent(&self, _socket: &UdpHandle, _peer: SocketAddr, _sent: usize) {}

    async fn on_error(&self, _socket: &UdpHandle, _error: &NetError) {}

    async fn on_stopped(&self, _socket: &UdpHandle) {}
}
