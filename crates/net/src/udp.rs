//! Datagram transports.
//!
//! UDP has no connection state: every receive carries the source endpoint
//! and every send names its target. There is consequently no session table
//! and no multicast here.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{NetError, NetResult};
use crate::handler::DatagramHandler;
use crate::options::UdpOptions;
use crate::session::guarded;
use crate::state::{AtomicServerState, ServerState};

/// The sending face of a bound datagram socket, cloneable into handlers.
#[derive(Clone)]
pub struct UdpHandle {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn DatagramHandler>,
    local_addr: SocketAddr,
    default_peer: Option<SocketAddr>,
}

impl UdpHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends one datagram and waits for the OS to take it.
    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> NetResult<usize> {
        let sent = self.socket.send_to(data, peer).await?;
        if let Some(reason) = guarded(self.handler.on_sent(self, peer, sent)).await {
            let _ = guarded(self.handler.on_error(self, &NetError::handler_panic(reason))).await;
        }
        Ok(sent)
    }

    /// Fire-and-forget send. `false` only when no default peer is known
    /// and none was given via [`send_to_async`].
    pub fn send_async(&self, data: impl Into<Vec<u8>>) -> bool {
        match self.default_peer {
            Some(peer) => self.send_to_async(data, peer),
            None => false,
        }
    }

    pub fn send_to_async(&self, data: impl Into<Vec<u8>>, peer: SocketAddr) -> bool {
        let data = data.into();
        let handle = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.send_to(&data, peer).await {
                let _ = guarded(handle.handler.on_error(&handle, &e)).await;
            }
        });
        true
    }

    /// Sends to the default peer (clients only).
    pub async fn send(&self, data: &[u8]) -> NetResult<usize> {
        match self.default_peer {
            Some(peer) => self.send_to(data, peer).await,
            None => Ok(0),
        }
    }
}

impl std::fmt::Debug for UdpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpHandle").field("local", &self.local_addr).finish()
    }
}

struct UdpShared {
    state: AtomicServerState,
    run: Mutex<Option<UdpRun>>,
    handle: Mutex<Option<UdpHandle>>,
}

struct UdpRun {
    cancel: CancellationToken,
    done: mpsc::Receiver<()>,
}

/// A bound datagram endpoint receiving from arbitrary peers.
pub struct UdpServer {
    endpoint: Endpoint,
    options: UdpOptions,
    handler: Arc<dyn DatagramHandler>,
    shared: Arc<UdpShared>,
}

impl UdpServer {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn DatagramHandler>) -> Self {
        Self::with_options(endpoint, handler, UdpOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn DatagramHandler>,
        options: UdpOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
            handler,
            shared: Arc::new(UdpShared {
                state: AtomicServerState::new(),
                run: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    pub fn handle(&self) -> Option<UdpHandle> {
        self.shared.handle.lock().unwrap().clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle().map(|handle| handle.local_addr())
    }

    pub async fn start(&self) -> NetResult<()> {
        start_udp(
            &self.endpoint,
            &self.options,
            self.handler.clone(),
            &self.shared,
            None,
        )
        .await
    }

    pub async fn stop(&self) {
        stop_udp(&self.shared, self.handler.clone()).await;
    }

    pub async fn restart(&self) -> NetResult<()> {
        self.stop().await;
        self.start().await
    }
}

/// The outbound counterpart: binds an ephemeral port and remembers the
/// target endpoint so `send` needs no explicit address.
pub struct UdpClient {
    endpoint: Endpoint,
    options: UdpOptions,
    handler: Arc<dyn DatagramHandler>,
    shared: Arc<UdpShared>,
}

impl UdpClient {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn DatagramHandler>) -> Self {
        Self::with_options(endpoint, handler, UdpOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn DatagramHandler>,
        options: UdpOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
            handler,
            shared: Arc::new(UdpShared {
                state: AtomicServerState::new(),
                run: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    /// Binds locally and returns the sending handle aimed at the target
    /// endpoint.
    pub async fn connect(&self) -> NetResult<UdpHandle> {
        let peer = self.endpoint.resolve().await?;
        start_udp(
            &Endpoint::new(if peer.is_ipv6() { "::" } else { "0.0.0.0" }, 0),
            &self.options,
            self.handler.clone(),
            &self.shared,
            Some(peer),
        )
        .await?;
        Ok(self.shared.handle.lock().unwrap().clone().expect("handle set by start"))
    }

    pub async fn disconnect(&self) {
        stop_udp(&self.shared, self.handler.clone()).await;
    }
}

async fn start_udp(
    endpoint: &Endpoint,
    options: &UdpOptions,
    handler: Arc<dyn DatagramHandler>,
    shared: &Arc<UdpShared>,
    default_peer: Option<SocketAddr>,
) -> NetResult<()> {
    let state = &shared.state;
    if !state.transition(ServerState::Created, ServerState::Starting)
        && !state.transition(ServerState::Stopped, ServerState::Starting)
    {
        return Err(NetError::invalid_state(format!(
            "cannot start udp endpoint in state {:?}",
            state.load()
        )));
    }

    let addr = match endpoint.resolve().await {
        Ok(addr) => addr,
        Err(e) => {
            state.store(ServerState::Stopped);
            return Err(e);
        }
    };
    let socket = match bind_udp(addr, options).and_then(UdpSocket::from_std) {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            state.store(ServerState::Stopped);
            return Err(e.into());
        }
    };

    let local_addr = socket.local_addr()?;
    info!(%local_addr, "udp endpoint bound");

    let handle = UdpHandle { socket: socket.clone(), handler: handler.clone(), local_addr, default_peer };
    *shared.handle.lock().unwrap() = Some(handle.clone());

    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = mpsc::channel(1);
    *shared.run.lock().unwrap() = Some(UdpRun { cancel: cancel.clone(), done: done_rx });

    let buffer_size = options.datagram_buffer_size;
    tokio::spawn(async move {
        if let Some(reason) = guarded(handle.handler.on_started(&handle)).await {
            let _ = guarded(handle.handler.on_error(&handle, &NetError::handler_panic(reason))).await;
        }
        receive_loop(socket, handle, cancel, buffer_size).await;
        drop(done_tx);
    });

    state.store(ServerState::Started);
    Ok(())
}

async fn stop_udp(shared: &Arc<UdpShared>, handler: Arc<dyn DatagramHandler>) {
    let state = &shared.state;
    if !state.transition(ServerState::Started, ServerState::Stopping) {
        return;
    }

    let run = shared.run.lock().unwrap().take();
    if let Some(mut run) = run {
        run.cancel.cancel();
        let _ = run.done.recv().await;
    }

    let handle = shared.handle.lock().unwrap().take();
    if let Some(handle) = handle {
        let _ = guarded(handler.on_stopped(&handle)).await;
    }
    state.store(ServerState::Stopped);
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    handle: UdpHandle,
    cancel: CancellationToken,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("udp receive loop cancelled");
                break;
            }
            received = socket.recv_from(&mut buffer) => received,
        };

        match received {
            Ok((n, peer)) => {
                if let Some(reason) =
                    guarded(handle.handler.on_received(&handle, peer, &buffer[..n])).await
                {
                    let _ = guarded(
                        handle.handler.on_error(&handle, &NetError::handler_panic(reason)),
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!(cause = %e, "udp receive failed");
                let _ = guarded(handle.handler.on_error(&handle, &NetError::Io { source: e })).await;
            }
        }
    }
}

fn bind_udp(addr: SocketAddr, options: &UdpOptions) -> io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if options.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(!options.dual_mode)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
