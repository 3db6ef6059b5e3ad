//! Socket and server configuration.
//!
//! These are plain option bags with serde derives so hosts can embed them
//! in their own configuration files; this library never loads files itself.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Per-connection socket options shared by servers and clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// Enable SO_KEEPALIVE with the tuning knobs below.
    pub keep_alive: bool,
    pub keep_alive_time: Option<Duration>,
    pub keep_alive_interval: Option<Duration>,
    pub keep_alive_retries: Option<u32>,
    pub recv_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
    /// Initial capacity of the session receive buffer.
    pub session_buffer_capacity: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            no_delay: false,
            keep_alive: false,
            keep_alive_time: None,
            keep_alive_interval: None,
            keep_alive_retries: None,
            recv_buffer_size: None,
            send_buffer_size: None,
            session_buffer_capacity: 8 * 1024,
        }
    }
}

/// Acceptor-side options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpServerOptions {
    pub tcp: TcpOptions,
    pub reuse_address: bool,
    /// SO_EXCLUSIVEADDRUSE; only meaningful on Windows.
    pub exclusive_address_use: bool,
    /// Accept both IPv4 and IPv6 on an IPv6 endpoint.
    pub dual_mode: bool,
    pub acceptor_backlog: u32,
}

impl Default for TcpServerOptions {
    fn default() -> Self {
        Self {
            tcp: TcpOptions::default(),
            reuse_address: true,
            exclusive_address_use: false,
            dual_mode: false,
            acceptor_backlog: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpOptions {
    pub reuse_address: bool,
    pub dual_mode: bool,
    pub recv_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
    /// Receive datagram buffer; one datagram never exceeds this.
    pub datagram_buffer_size: usize,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            dual_mode: false,
            recv_buffer_size: None,
            send_buffer_size: None,
            datagram_buffer_size: 64 * 1024,
        }
    }
}

/// Binds a listener with the acceptor options applied.
pub(crate) fn bind_listener(addr: SocketAddr, options: &TcpServerOptions) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv6() { TcpSocket::new_v6()? } else { TcpSocket::new_v4()? };
    if options.reuse_address {
        socket.set_reuseaddr(true)?;
    }
    {
        let sock_ref = SockRef::from(&socket);
        #[cfg(windows)]
        if options.exclusive_address_use {
            sock_ref.set_exclusive_address_use(true)?;
        }
        if addr.is_ipv6() {
            sock_ref.set_only_v6(!options.dual_mode)?;
        }
        if let Some(size) = options.tcp.recv_buffer_size {
            sock_ref.set_recv_buffer_size(size)?;
        }
        if let Some(size) = options.tcp.send_buffer_size {
            sock_ref.set_send_buffer_size(size)?;
        }
    }
    socket.bind(addr)?;
    socket.listen(options.acceptor_backlog)
}

/// Applies per-connection options to an established stream.
pub(crate) fn apply_stream_options(stream: &TcpStream, options: &TcpOptions) -> std::io::Result<()> {
    stream.set_nodelay(options.no_delay)?;
    if options.keep_alive {
        let sock_ref = SockRef::from(stream);
        let mut keepalive = TcpKeepalive::new();
        if let Some(time) = options.keep_alive_time {
            keepalive = keepalive.with_time(time);
        }
        if let Some(interval) = options.keep_alive_interval {
            keepalive = keepalive.with_interval(interval);
        }
        #[cfg(not(windows))]
        if let Some(retries) = options.keep_alive_retries {
            keepalive = keepalive.with_retries(retries);
        }
        sock_ref.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let options = TcpServerOptions::default();
        assert!(options.reuse_address);
        assert!(!options.tcp.no_delay);
        assert_eq!(options.acceptor_backlog, 1024);
        assert!(options.tcp.session_buffer_capacity > 0);
    }

    #[tokio::test]
    async fn bind_with_options() {
        let options = TcpServerOptions::default();
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &options).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }
}
