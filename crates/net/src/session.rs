//! Per-connection session machinery shared by TCP and TLS transports.
//!
//! A [`SessionHandle`] is the cheap, cloneable face of one connected peer:
//! stable 128-bit id, addresses, atomic state, byte counters, and the send
//! queue. The I/O itself runs on two loops spawned per session: a receive
//! loop that hands freshly read regions to the handler without copying, and
//! a send loop that performs one in-flight OS write at a time and keeps the
//! FIFO order of enqueued payloads.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use std::future::Future;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{NetError, NetResult};
use crate::handler::SessionHandler;
use crate::options::TcpOptions;
use crate::state::{AtomicSessionState, SessionState};

/// Concurrent session table: readers iterate a consistent snapshot while
/// accepts and disconnects mutate it.
pub(crate) type SessionTable = Arc<DashMap<Uuid, SessionHandle>>;

pub(crate) enum WriteOp {
    Data { data: Bytes, ack: Option<oneshot::Sender<io::Result<usize>>> },
    Flush { ack: oneshot::Sender<io::Result<()>> },
}

pub(crate) type WriteReceiver = mpsc::UnboundedReceiver<WriteOp>;

struct SessionInner {
    id: Uuid,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    state: AtomicSessionState,
    pending: AtomicUsize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    write_tx: mpsc::UnboundedSender<WriteOp>,
    /// Cancels both I/O loops; the one disconnect primitive.
    cancel: CancellationToken,
    /// Fires once teardown has fully finished.
    closed: CancellationToken,
    local_disconnect: AtomicBool,
}

/// One connected peer's I/O context.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub(crate) fn create(peer_addr: SocketAddr, local_addr: SocketAddr) -> (Self, WriteReceiver) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            id: Uuid::new_v4(),
            peer_addr,
            local_addr,
            state: AtomicSessionState::new(SessionState::Created),
            pending: AtomicUsize::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            write_tx,
            cancel: CancellationToken::new(),
            closed: CancellationToken::new(),
            local_disconnect: AtomicBool::new(false),
        };
        (Self { inner: Arc::new(inner) }, write_rx)
    }

    /// Stable identity; the key in the owning server's session table.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Bytes enqueued but not yet written to the socket.
    pub fn pending_bytes(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Whether the teardown was initiated by this side (as opposed to a
    /// peer close or an error).
    pub fn initiated_disconnect(&self) -> bool {
        self.inner.local_disconnect.load(Ordering::Relaxed)
    }

    /// Sends and waits for the OS write to complete. Returns the number of
    /// bytes written, or `Ok(0)` when the session is not connected; a
    /// lifecycle misuse is silent, never an error.
    pub async fn send(&self, data: impl Into<Bytes>) -> NetResult<usize> {
        let data = data.into();
        let len = data.len();
        if !self.is_connected() || len == 0 {
            return Ok(0);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner.pending.fetch_add(len, Ordering::Relaxed);
        if self.inner.write_tx.send(WriteOp::Data { data, ack: Some(ack_tx) }).is_err() {
            self.inner.pending.fetch_sub(len, Ordering::Relaxed);
            return Ok(0);
        }
        match ack_rx.await {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(source)) => Err(NetError::Io { source }),
            // the op was dropped by a concurrent disconnect
            Err(_) => Ok(0),
        }
    }

    /// Enqueues without waiting. `false` when the session is not connected
    /// or is shutting down.
    pub fn send_async(&self, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        if !self.is_connected() || data.is_empty() {
            return false;
        }
        let len = data.len();
        self.inner.pending.fetch_add(len, Ordering::Relaxed);
        if self.inner.write_tx.send(WriteOp::Data { data, ack: None }).is_err() {
            self.inner.pending.fetch_sub(len, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Waits until everything enqueued before this call has reached the
    /// socket.
    pub async fn flush(&self) -> NetResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.write_tx.send(WriteOp::Flush { ack: ack_tx }).is_err() {
            return Ok(());
        }
        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(NetError::Io { source }),
            Err(_) => Ok(()),
        }
    }

    /// Starts the teardown and waits for it to finish. Idempotent: later
    /// calls wait on the same teardown.
    pub async fn disconnect(&self) {
        self.disconnect_async();
        match self.state() {
            SessionState::Disconnecting | SessionState::Disconnected => {
                self.inner.closed.cancelled().await;
            }
            _ => {}
        }
    }

    /// Starts the teardown without waiting. `true` when this call
    /// performed the `Connected -> Disconnecting` transition.
    pub fn disconnect_async(&self) -> bool {
        if self.inner.state.transition(SessionState::Connected, SessionState::Disconnecting) {
            self.inner.local_disconnect.store(true, Ordering::Relaxed);
            self.inner.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer_addr)
            .field("state", &self.inner.state.load())
            .finish()
    }
}

/// Runs a handler callback, catching panics so they never cross into the
/// I/O loops. Returns the panic text when one occurred.
pub(crate) async fn guarded<F>(callback: F) -> Option<String>
where
    F: Future<Output = ()>,
{
    match std::panic::AssertUnwindSafe(callback).catch_unwind().await {
        Ok(()) => None,
        Err(payload) => Some(panic_text(payload)),
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

async fn report(handler: &Arc<dyn SessionHandler>, session: &SessionHandle, error: NetError) {
    let _ = guarded(handler.on_error(session, &error)).await;
}

/// Brings a freshly established stream through the connect callbacks,
/// registers it, and spawns its I/O loops. The send loop is live before
/// `on_connected` fires, so handlers may await `send` right away; the
/// receive loop starts only afterwards, keeping the callback order.
pub(crate) async fn open_session<S>(
    stream: S,
    session: SessionHandle,
    write_rx: WriteReceiver,
    handler: Arc<dyn SessionHandler>,
    options: TcpOptions,
    table: Option<SessionTable>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let write_task = tokio::spawn(write_loop(writer, write_rx, session.clone(), handler.clone()));

    session.set_state(SessionState::Connecting);
    if let Some(reason) = guarded(handler.on_connecting(&session)).await {
        report(&handler, &session, NetError::handler_panic(reason)).await;
    }

    session.set_state(SessionState::Connected);
    if let Some(table) = &table {
        table.insert(session.id(), session.clone());
    }
    if let Some(reason) = guarded(handler.on_connected(&session)).await {
        report(&handler, &session, NetError::handler_panic(reason)).await;
    }

    let capacity = options.session_buffer_capacity;
    tokio::spawn(async move {
        read_loop(reader, session.clone(), handler.clone(), capacity).await;

        // whichever loop ends first takes the other one down with it
        session.inner.cancel.cancel();
        let _ = write_task.await;

        finalize(session, handler, table).await;
    });
}

/// Reports a session that failed before reaching `Connected` (for example
/// a TLS handshake failure) and settles it in the terminal state.
pub(crate) async fn fail_session(session: SessionHandle, handler: Arc<dyn SessionHandler>, error: NetError) {
    report(&handler, &session, error).await;
    session.set_state(SessionState::Disconnected);
    if let Some(reason) = guarded(handler.on_disconnected(&session)).await {
        report(&handler, &session, NetError::handler_panic(reason)).await;
    }
    session.inner.closed.cancel();
}

async fn read_loop<R>(
    mut reader: R,
    session: SessionHandle,
    handler: Arc<dyn SessionHandler>,
    initial_capacity: usize,
) where
    R: AsyncRead + Unpin,
{
    let cancel = session.inner.cancel.clone();
    let mut capacity = initial_capacity.max(1);
    let mut buffer = BytesMut::with_capacity(capacity);

    loop {
        buffer.clear();
        if buffer.capacity() < capacity {
            buffer.reserve(capacity - buffer.capacity());
        }

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = reader.read_buf(&mut buffer) => result,
        };

        match received {
            Ok(0) => {
                debug!(id = %session.id(), "peer closed the connection");
                break;
            }
            Ok(n) => {
                session.inner.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                trace!(id = %session.id(), bytes = n, "received");
                if let Some(reason) = guarded(handler.on_received(&session, &buffer[..n])).await {
                    report(&handler, &session, NetError::handler_panic(reason)).await;
                }
                // the receive buffer is reused; grow once a read saturates it
                if n == capacity {
                    capacity *= 2;
                }
            }
            Err(source) => {
                report(&handler, &session, NetError::Io { source }).await;
                break;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut write_rx: WriteReceiver,
    session: SessionHandle,
    handler: Arc<dyn SessionHandler>,
) where
    W: AsyncWrite + Unpin,
{
    let cancel = session.inner.cancel.clone();

    loop {
        let op = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            op = write_rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };

        match op {
            WriteOp::Data { data, ack } => {
                let len = data.len();
                let result = async {
                    writer.write_all(&data).await?;
                    writer.flush().await
                }
                .await;

                match result {
                    Ok(()) => {
                        session.inner.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                        let pending =
                            session.inner.pending.fetch_sub(len, Ordering::Relaxed) - len;
                        if let Some(ack) = ack {
                            let _ = ack.send(Ok(len));
                        }
                        if let Some(reason) =
                            guarded(handler.on_sent(&session, len, pending)).await
                        {
                            report(&handler, &session, NetError::handler_panic(reason)).await;
                        }
                        if pending == 0 {
                            if let Some(reason) = guarded(handler.on_empty(&session)).await {
                                report(&handler, &session, NetError::handler_panic(reason)).await;
                            }
                        }
                    }
                    Err(error) => {
                        let kind = error.kind();
                        let text = error.to_string();
                        if let Some(ack) = ack {
                            let _ = ack.send(Err(error));
                        }
                        report(&handler, &session, NetError::Io { source: io::Error::new(kind, text) })
                            .await;
                        cancel.cancel();
                        break;
                    }
                }
            }
            WriteOp::Flush { ack } => {
                let _ = ack.send(writer.flush().await);
            }
        }
    }

    // half-open close: push our FIN (or TLS close_notify) out
    let _ = writer.shutdown().await;
}

async fn finalize(session: SessionHandle, handler: Arc<dyn SessionHandler>, table: Option<SessionTable>) {
    // peer-initiated teardown goes through the same single cleanup path
    session.inner.state.transition(SessionState::Connected, SessionState::Disconnecting);

    if let Some(table) = table {
        table.remove(&session.id());
    }

    if let Some(reason) = guarded(handler.on_disconnecting(&session)).await {
        report(&handler, &session, NetError::handler_panic(reason)).await;
    }

    session.set_state(SessionState::Disconnected);
    if let Some(reason) = guarded(handler.on_disconnected(&session)).await {
        report(&handler, &session, NetError::handler_panic(reason)).await;
    }

    debug!(id = %session.id(), "session finalized");
    session.inner.closed.cancel();
}
