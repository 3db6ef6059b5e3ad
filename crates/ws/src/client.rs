//! WebSocket client overlay: dials, upgrades, then speaks frames.
//!
//! Two consumption styles: [`WsClient::connect`] returns a
//! [`WsConnection`] whose events queue up for `receive_*` helpers, and
//! [`WsClient::connect_with`] routes events into a [`WsHandler`]. Either
//! way outbound frames are masked with a fresh key each, and trailing
//! bytes behind the `101` response are re-fed into the frame codec.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use tethys_http::ResponseCodec;
use tethys_net::{Endpoint, SessionHandle, SessionHandler, TcpClient, TcpOptions, TlsClient, TlsContext};
use tokio_util::codec::Decoder;

use crate::error::WsError;
use crate::handshake::{generate_sec_key, make_upgrade_request, validate_upgrade_response};
use crate::session::{drain_events, EventSink, WsEngine, WsEvent, WsHandler, WsSession};

pub struct WsClient {
    endpoint: Endpoint,
    target: String,
    options: TcpOptions,
    tls: Option<TlsContext>,
}

impl WsClient {
    /// A client for `ws://endpoint<target>`.
    pub fn new(endpoint: impl Into<Endpoint>, target: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), target: target.into(), options: TcpOptions::default(), tls: None }
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        target: impl Into<String>,
        options: TcpOptions,
    ) -> Self {
        Self { endpoint: endpoint.into(), target: target.into(), options, tls: None }
    }

    /// WSS: dial through the host's TLS context.
    pub fn with_tls(
        endpoint: impl Into<Endpoint>,
        target: impl Into<String>,
        context: TlsContext,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            target: target.into(),
            options: TcpOptions::default(),
            tls: Some(context),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connects and hands back a queue-mode connection.
    pub async fn connect(&self) -> Result<WsConnection, WsError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.connect_inner(EventSink::Queue(tx)).await?;
        Ok(WsConnection { session, events: rx })
    }

    /// Connects and routes events into `handler`.
    pub async fn connect_with(&self, handler: Arc<dyn WsHandler>) -> Result<WsSession, WsError> {
        self.connect_inner(EventSink::Handler(handler)).await
    }

    async fn connect_inner(&self, sink: EventSink) -> Result<WsSession, WsError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let adapter = Arc::new(WsClientAdapter {
            sink,
            sec_key: generate_sec_key(),
            host: self.endpoint.to_string(),
            target: self.target.clone(),
            state: Mutex::new(ClientState {
                handshaked: false,
                response_codec: ResponseCodec::new(),
                http_src: BytesMut::new(),
                engine: WsEngine::client(),
            }),
            ready: StdMutex::new(Some(ready_tx)),
            session_slot: StdMutex::new(None),
        });

        let transport: Arc<dyn SessionHandler> = adapter.clone();
        match &self.tls {
            None => {
                TcpClient::with_options(self.endpoint.clone(), transport, self.options.clone())
                    .connect()
                    .await?;
            }
            Some(context) => {
                TlsClient::with_options(
                    self.endpoint.clone(),
                    transport,
                    context.clone(),
                    self.options.clone(),
                )
                .connect()
                .await?;
            }
        }

        ready_rx.await.map_err(|_| WsError::Closed)??;
        let session = adapter.session_slot.lock().unwrap().clone();
        session.ok_or(WsError::Closed)
    }
}

/// A connected, handshaked client in queue mode.
pub struct WsConnection {
    session: WsSession,
    events: mpsc::UnboundedReceiver<WsEvent>,
}

impl WsConnection {
    pub fn session(&self) -> &WsSession {
        &self.session
    }

    /// The next event, in arrival order. `None` once the session is gone.
    pub async fn receive(&mut self) -> Option<WsEvent> {
        self.events.recv().await
    }

    /// Waits for the next data message and returns it as text. Control
    /// events are skipped (PINGs were already answered).
    pub async fn receive_text(&mut self) -> Result<String, WsError> {
        loop {
            match self.events.recv().await {
                Some(WsEvent::Text(text)) => return Ok(text),
                Some(WsEvent::Binary(payload)) => {
                    return Ok(String::from_utf8_lossy(&payload).into_owned());
                }
                Some(WsEvent::Ping(_) | WsEvent::Pong(_)) => continue,
                Some(WsEvent::Close { .. }) | None => return Err(WsError::Closed),
            }
        }
    }

    /// Waits for the next data message and returns its bytes.
    pub async fn receive_binary(&mut self) -> Result<Bytes, WsError> {
        loop {
            match self.events.recv().await {
                Some(WsEvent::Text(text)) => return Ok(Bytes::from(text.into_bytes())),
                Some(WsEvent::Binary(payload)) => return Ok(payload),
                Some(WsEvent::Ping(_) | WsEvent::Pong(_)) => continue,
                Some(WsEvent::Close { .. }) | None => return Err(WsError::Closed),
            }
        }
    }

    /// Sends CLOSE, flushes it, and disconnects.
    pub async fn close(&self, status: u16, reason: &[u8]) {
        self.session.close(status, reason).await;
    }
}

struct ClientState {
    handshaked: bool,
    response_codec: ResponseCodec,
    http_src: BytesMut,
    engine: WsEngine,
}

struct WsClientAdapter {
    sink: EventSink,
    sec_key: String,
    host: String,
    target: String,
    state: Mutex<ClientState>,
    ready: StdMutex<Option<oneshot::Sender<Result<(), WsError>>>>,
    session_slot: StdMutex<Option<WsSession>>,
}

impl WsClientAdapter {
    fn settle(&self, outcome: Result<(), WsError>) {
        if let Some(tx) = self.ready.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }

    fn ws_session(&self) -> Option<WsSession> {
        self.session_slot.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionHandler for WsClientAdapter {
    async fn on_connected(&self, session: &SessionHandle) {
        let ws_session = WsSession::new(session.clone(), true);
        *self.session_slot.lock().unwrap() = Some(ws_session);

        let request = make_upgrade_request(&self.host, &self.target, &self.sec_key);
        session.send_async(Bytes::copy_from_slice(request.cache()));
        debug!(id = %session.id(), target = %self.target, "upgrade request queued");
    }

    async fn on_received(&self, session: &SessionHandle, data: &[u8]) {
        let Some(ws_session) = self.ws_session() else {
            return;
        };
        let mut guard = self.state.lock().await;
        let ClientState { handshaked, response_codec, http_src, engine } = &mut *guard;

        if !*handshaked {
            http_src.extend_from_slice(data);
            match response_codec.decode(http_src) {
                Ok(Some(response)) => match validate_upgrade_response(&response, &self.sec_key) {
                    Ok(()) => {
                        *handshaked = true;
                        ws_session.set_handshaked();
                        debug!(id = %session.id(), "websocket handshake complete");
                        self.settle(Ok(()));
                        self.sink.connected(&ws_session).await;

                        // response-body trailing bytes are frame data
                        if !http_src.is_empty() {
                            let trailing = http_src.split();
                            engine.feed(&trailing);
                        }
                        drain_events(engine, &ws_session, &self.sink).await;
                    }
                    Err(error) => {
                        self.settle(Err(error));
                        session.disconnect_async();
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    self.settle(Err(error.into()));
                    session.disconnect_async();
                }
            }
        } else {
            engine.feed(data);
            drain_events(engine, &ws_session, &self.sink).await;
        }
    }

    async fn on_disconnected(&self, _session: &SessionHandle) {
        self.settle(Err(WsError::Closed));
        if let Some(ws_session) = self.ws_session() {
            self.sink.disconnected(&ws_session).await;
        }
    }
}
