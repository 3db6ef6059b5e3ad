//! WebSocket sessions: atomic frame emission, fragmented-message assembly,
//! and control-frame handling shared by the server and client overlays.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::debug;
use uuid::Uuid;

use tethys_net::{NetResult, SessionHandle};

use crate::codec::{Frame, FrameDecoder};
use crate::error::WsError;
use crate::frame::{encode_frame, random_mask_key, Opcode};

/// Normal closure (RFC 6455 section 7.4.1).
pub const CLOSE_NORMAL: u16 = 1000;
/// Protocol error closure.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Message-level events of a WebSocket connection.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// The handshake completed; frames flow from here on.
    async fn on_ws_connected(&self, _session: &WsSession) {}

    /// A fully assembled TEXT or BINARY message.
    async fn on_ws_received(&self, _session: &WsSession, _opcode: Opcode, _payload: &[u8]) {}

    /// A PING arrived; the matching PONG was already queued.
    async fn on_ws_ping(&self, _session: &WsSession, _payload: &[u8]) {}

    async fn on_ws_pong(&self, _session: &WsSession, _payload: &[u8]) {}

    /// The peer sent CLOSE; the transport disconnects after this callback.
    async fn on_ws_close(&self, _session: &WsSession, _status: u16, _reason: &[u8]) {}

    async fn on_ws_disconnected(&self, _session: &WsSession) {}

    async fn on_ws_error(&self, _session: &WsSession, _error: &WsError) {}
}

/// Queue-mode events for [`WsConnection`](crate::client::WsConnection).
#[derive(Debug, Clone)]
pub enum WsEvent {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { status: u16, reason: Bytes },
}

/// One WebSocket peer: frame-level send API over a transport session.
///
/// Frame emission is atomic: a lock is held across "build frame, enqueue
/// bytes", so concurrent senders can never interleave partial frames and
/// every client frame gets its own fresh mask key.
#[derive(Clone)]
pub struct WsSession {
    transport: SessionHandle,
    /// Client sessions mask outbound frames; servers do not.
    masked: bool,
    handshaked: Arc<AtomicBool>,
    close_sent: Arc<AtomicBool>,
    send_lock: Arc<StdMutex<()>>,
}

impl WsSession {
    pub(crate) fn new(transport: SessionHandle, masked: bool) -> Self {
        Self {
            transport,
            masked,
            handshaked: Arc::new(AtomicBool::new(false)),
            close_sent: Arc::new(AtomicBool::new(false)),
            send_lock: Arc::new(StdMutex::new(())),
        }
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

    /// Whether the opening handshake has completed.
    pub fn is_handshaked(&self) -> bool {
        self.handshaked.load(Ordering::Acquire)
    }

    pub(crate) fn set_handshaked(&self) {
        self.handshaked.store(true, Ordering::Release);
    }

    pub(crate) fn close_sent(&self) -> bool {
        self.close_sent.load(Ordering::Acquire)
    }

    // ---- send API ---------------------------------------------------

    pub async fn send_text(&self, text: &str) -> NetResult<usize> {
        self.send_frame(Opcode::Text, text.as_bytes()).await
    }

    pub fn send_text_async(&self, text: &str) -> bool {
        self.enqueue_frame(Opcode::Text, text.as_bytes())
    }

    pub async fn send_binary(&self, payload: &[u8]) -> NetResult<usize> {
        self.send_frame(Opcode::Binary, payload).await
    }

    pub fn send_binary_async(&self, payload: &[u8]) -> bool {
        self.enqueue_frame(Opcode::Binary, payload)
    }

    pub async fn send_ping(&self, payload: &[u8]) -> NetResult<usize> {
        self.send_frame(Opcode::Ping, payload).await
    }

    pub fn send_ping_async(&self, payload: &[u8]) -> bool {
        self.enqueue_frame(Opcode::Ping, payload)
    }

    pub async fn send_pong(&self, payload: &[u8]) -> NetResult<usize> {
        self.send_frame(Opcode::Pong, payload).await
    }

    pub fn send_pong_async(&self, payload: &[u8]) -> bool {
        self.enqueue_frame(Opcode::Pong, payload)
    }

    /// Sends a CLOSE frame (big-endian status, then the reason bytes) and
    /// waits until it reached the wire.
    pub async fn send_close(&self, status: u16, reason: &[u8]) -> NetResult<usize> {
        self.close_sent.store(true, Ordering::Release);
        self.send_frame(Opcode::Close, &close_payload(status, reason)).await
    }

    pub fn send_close_async(&self, status: u16, reason: &[u8]) -> bool {
        self.close_sent.store(true, Ordering::Release);
        self.enqueue_frame(Opcode::Close, &close_payload(status, reason))
    }

    /// Flushes a CLOSE frame to the wire, then disconnects the transport.
    /// The flush matters: shutting down first would race the CLOSE against
    /// the FIN.
    pub async fn close(&self, status: u16, reason: &[u8]) {
        let _ = self.send_close(status, reason).await;
        self.transport.disconnect().await;
    }

    /// Fire-and-forget [`close`](Self::close); the flush and disconnect run
    /// off the caller's task so a callback can close without blocking the
    /// pump.
    pub fn close_async(&self, status: u16, reason: &[u8]) {
        self.send_close_async(status, reason);
        let session = self.clone();
        tokio::spawn(async move {
            let _ = session.transport.flush().await;
            session.transport.disconnect().await;
        });
    }

    fn enqueue_frame(&self, opcode: Opcode, payload: &[u8]) -> bool {
        let _guard = self.send_lock.lock().unwrap();
        let mask = self.masked.then(random_mask_key);
        let frame = encode_frame(true, opcode, mask, payload);
        self.transport.send_async(frame)
    }

    async fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> NetResult<usize> {
        if !self.enqueue_frame(opcode, payload) {
            return Ok(0);
        }
        self.transport.flush().await?;
        Ok(payload.len())
    }
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("id", &self.id())
            .field("handshaked", &self.is_handshaked())
            .finish()
    }
}

pub(crate) fn close_payload(status: u16, reason: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&status.to_be_bytes());
    payload.extend_from_slice(reason);
    payload
}

/// A fully assembled incoming event.
#[derive(Debug)]
pub(crate) enum Incoming {
    Message(Opcode, Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16, Bytes),
}

/// Per-connection receive state: frame decoding plus multiplexed
/// fragmented-message assembly. Control frames pass through without
/// touching the assembly.
pub(crate) struct WsEngine {
    decoder: FrameDecoder,
    src: BytesMut,
    assembly: BytesMut,
    fragment_opcode: Option<Opcode>,
}

impl WsEngine {
    pub(crate) fn server() -> Self {
        Self::with_decoder(FrameDecoder::server())
    }

    pub(crate) fn client() -> Self {
        Self::with_decoder(FrameDecoder::client())
    }

    fn with_decoder(decoder: FrameDecoder) -> Self {
        Self { decoder, src: BytesMut::new(), assembly: BytesMut::new(), fragment_opcode: None }
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.src.extend_from_slice(data);
    }

    /// The next complete event, or `None` when more bytes are needed.
    pub(crate) fn next(&mut self) -> Result<Option<Incoming>, WsError> {
        loop {
            let Some(frame) = self.decoder.decode(&mut self.src)? else {
                return Ok(None);
            };

            if frame.opcode.is_control() {
                return Ok(Some(self.control_event(frame)));
            }

            match (frame.opcode, self.fragment_opcode) {
                (Opcode::Continuation, None) => {
                    return Err(WsError::frame("continuation without a started message"));
                }
                (Opcode::Continuation, Some(opcode)) => {
                    self.assembly.extend_from_slice(&frame.payload);
                    if frame.fin {
                        self.fragment_opcode = None;
                        let message = self.assembly.split().freeze();
                        return Ok(Some(Incoming::Message(opcode, message)));
                    }
                }
                (_, Some(_)) => {
                    return Err(WsError::frame("new data frame inside a fragmented message"));
                }
                (opcode, None) => {
                    if frame.fin {
                        return Ok(Some(Incoming::Message(opcode, frame.payload)));
                    }
                    self.fragment_opcode = Some(opcode);
                    self.assembly.extend_from_slice(&frame.payload);
                }
            }
        }
    }

    fn control_event(&self, frame: Frame) -> Incoming {
        match frame.opcode {
            Opcode::Ping => Incoming::Ping(frame.payload),
            Opcode::Pong => Incoming::Pong(frame.payload),
            _ => {
                let (status, reason) = if frame.payload.len() >= 2 {
                    (
                        u16::from_be_bytes([frame.payload[0], frame.payload[1]]),
                        frame.payload.slice(2..),
                    )
                } else {
                    (CLOSE_NORMAL, Bytes::new())
                };
                Incoming::Close(status, reason)
            }
        }
    }
}

/// Where assembled events go: a handler object or a queue-mode channel.
pub(crate) enum EventSink {
    Handler(Arc<dyn WsHandler>),
    Queue(mpsc::UnboundedSender<WsEvent>),
}

impl EventSink {
    pub(crate) async fn connected(&self, session: &WsSession) {
        if let EventSink::Handler(handler) = self {
            handler.on_ws_connected(session).await;
        }
    }

    pub(crate) async fn disconnected(&self, session: &WsSession) {
        if let EventSink::Handler(handler) = self {
            handler.on_ws_disconnected(session).await;
        }
    }

    pub(crate) async fn error(&self, session: &WsSession, error: &WsError) {
        if let EventSink::Handler(handler) = self {
            handler.on_ws_error(session, error).await;
        }
    }

    async fn message(&self, session: &WsSession, opcode: Opcode, payload: Bytes) {
        match self {
            EventSink::Handler(handler) => handler.on_ws_received(session, opcode, &payload).await,
            EventSink::Queue(tx) => {
                let event = match opcode {
                    Opcode::Text => WsEvent::Text(String::from_utf8_lossy(&payload).into_owned()),
                    _ => WsEvent::Binary(payload),
                };
                let _ = tx.send(event);
            }
        }
    }

    async fn ping(&self, session: &WsSession, payload: Bytes) {
        match self {
            EventSink::Handler(handler) => handler.on_ws_ping(session, &payload).await,
            EventSink::Queue(tx) => {
                let _ = tx.send(WsEvent::Ping(payload));
            }
        }
    }

    async fn pong(&self, session: &WsSession, payload: Bytes) {
        match self {
            EventSink::Handler(handler) => handler.on_ws_pong(session, &payload).await,
            EventSink::Queue(tx) => {
                let _ = tx.send(WsEvent::Pong(payload));
            }
        }
    }

    async fn close(&self, session: &WsSession, status: u16, reason: Bytes) {
        match self {
            EventSink::Handler(handler) => handler.on_ws_close(session, status, &reason).await,
            EventSink::Queue(tx) => {
                let _ = tx.send(WsEvent::Close { status, reason });
            }
        }
    }
}

/// Drains every complete event out of the engine and dispatches it.
/// PING answers itself, CLOSE echoes (unless we initiated), is flushed,
/// and takes the transport down; frame violations answer CLOSE 1002.
pub(crate) async fn drain_events(engine: &mut WsEngine, session: &WsSession, sink: &EventSink) {
    loop {
        match engine.next() {
            Ok(Some(Incoming::Message(opcode, payload))) => {
                sink.message(session, opcode, payload).await;
            }
            Ok(Some(Incoming::Ping(payload))) => {
                session.send_pong_async(&payload);
                sink.ping(session, payload).await;
            }
            Ok(Some(Incoming::Pong(payload))) => {
                sink.pong(session, payload).await;
            }
            Ok(Some(Incoming::Close(status, reason))) => {
                debug!(id = %session.id(), status, "close frame received");
                if !session.close_sent() {
                    session.send_close_async(status, &reason);
                }
                sink.close(session, status, reason).await;
                let _ = session.transport().flush().await;
                session.transport().disconnect_async();
                break;
            }
            Ok(None) => break,
            Err(error) => {
                debug!(id = %session.id(), %error, "frame violation");
                sink.error(session, &error).await;
                session.send_close_async(CLOSE_PROTOCOL_ERROR, b"protocol error");
                let _ = session.transport().flush().await;
                session.transport().disconnect_async();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, random_mask_key};

    fn feed_frames(engine: &mut WsEngine, frames: &[(bool, Opcode, &[u8])]) {
        for (fin, opcode, payload) in frames {
            let wire = encode_frame(*fin, *opcode, Some(random_mask_key()), payload);
            engine.feed(&wire);
        }
    }

    #[test]
    fn fragmented_message_reassembles_once() {
        let mut engine = WsEngine::server();
        feed_frames(
            &mut engine,
            &[(false, Opcode::Text, b"Hel"), (true, Opcode::Continuation, b"lo")],
        );

        match engine.next().unwrap() {
            Some(Incoming::Message(Opcode::Text, payload)) => assert_eq!(&payload[..], b"Hello"),
            other => panic!("expected text message, got {other:?}"),
        }
        assert!(engine.next().unwrap().is_none());
    }

    #[test]
    fn ping_interleaves_without_disturbing_assembly() {
        let mut engine = WsEngine::server();
        feed_frames(
            &mut engine,
            &[
                (false, Opcode::Text, b"Hel"),
                (true, Opcode::Ping, b"probe"),
                (true, Opcode::Continuation, b"lo"),
            ],
        );

        match engine.next().unwrap() {
            Some(Incoming::Ping(payload)) => assert_eq!(&payload[..], b"probe"),
            other => panic!("expected ping first, got {other:?}"),
        }
        match engine.next().unwrap() {
            Some(Incoming::Message(Opcode::Text, payload)) => assert_eq!(&payload[..], b"Hello"),
            other => panic!("expected assembled message, got {other:?}"),
        }
    }

    #[test]
    fn continuation_without_start_is_a_violation() {
        let mut engine = WsEngine::server();
        feed_frames(&mut engine, &[(true, Opcode::Continuation, b"orphan")]);
        assert!(engine.next().is_err());
    }

    #[test]
    fn data_frame_inside_fragment_is_a_violation() {
        let mut engine = WsEngine::server();
        feed_frames(
            &mut engine,
            &[(false, Opcode::Text, b"Hel"), (true, Opcode::Binary, b"intruder")],
        );
        assert!(engine.next().is_err());
    }

    #[test]
    fn close_status_and_reason_decode() {
        let mut engine = WsEngine::server();
        let payload = close_payload(1000, b"bye");
        feed_frames(&mut engine, &[(true, Opcode::Close, &payload)]);

        match engine.next().unwrap() {
            Some(Incoming::Close(status, reason)) => {
                assert_eq!(status, 1000);
                assert_eq!(&reason[..], b"bye");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn empty_close_defaults_to_normal() {
        let mut engine = WsEngine::server();
        feed_frames(&mut engine, &[(true, Opcode::Close, b"")]);
        match engine.next().unwrap() {
            Some(Incoming::Close(status, reason)) => {
                assert_eq!(status, CLOSE_NORMAL);
                assert!(reason.is_empty());
            }
            other => panic!("expected close, got {other:?}"),
        }
    }
}
