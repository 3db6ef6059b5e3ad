//! WebSocket server overlay: HTTP upgrade endpoint over the TCP (or TLS)
//! transport.
//!
//! Until a session handshakes, its bytes run through the HTTP request
//! codec; a validated upgrade answers `101 Switching Protocols` and flips
//! the session into frame mode. From then on no HTTP bytes are parsed on
//! that session.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tethys_http::{HttpResponse, RequestCodec};
use tethys_net::{
    Endpoint, NetResult, ServerState, SessionHandle, SessionHandler, TcpServer, TcpServerOptions,
    TlsContext, TlsServer,
};
use tokio_util::codec::Decoder;

use crate::error::WsError;
use crate::frame::{encode_frame, Opcode};
use crate::handshake::{make_upgrade_response, validate_upgrade_request};
use crate::session::{drain_events, EventSink, WsEngine, WsHandler, WsSession};

/// A WebSocket server; with a [`TlsContext`] it serves WSS.
pub struct WsServer {
    core: TcpServer,
    adapter: Arc<WsServerAdapter>,
}

impl WsServer {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn WsHandler>) -> Self {
        Self::with_options(endpoint, handler, TcpServerOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn WsHandler>,
        options: TcpServerOptions,
    ) -> Self {
        let adapter = Arc::new(WsServerAdapter::new(handler));
        let core = TcpServer::with_options(endpoint, adapter.clone(), options);
        Self { core, adapter }
    }

    pub fn with_tls(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn WsHandler>,
        context: &TlsContext,
        options: TcpServerOptions,
    ) -> NetResult<Self> {
        let adapter = Arc::new(WsServerAdapter::new(handler));
        let tls = TlsServer::with_options(endpoint, adapter.clone(), context, options)?;
        Ok(Self { core: tls.into_server(), adapter })
    }

    /// The underlying transport server.
    pub fn server(&self) -> &TcpServer {
        &self.core
    }

    pub fn state(&self) -> ServerState {
        self.core.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    pub async fn start(&self) -> NetResult<()> {
        self.core.start().await
    }

    pub async fn stop(&self) {
        self.core.stop().await
    }

    pub async fn restart(&self) -> NetResult<()> {
        self.core.restart().await
    }

    /// Sends one TEXT frame to every handshaked session. The frame is
    /// built once; returns how many sessions accepted it.
    pub fn multicast_text(&self, text: &str) -> usize {
        self.multicast_frame(Opcode::Text, text.as_bytes())
    }

    /// Sends one BINARY frame to every handshaked session.
    pub fn multicast_binary(&self, payload: &[u8]) -> usize {
        self.multicast_frame(Opcode::Binary, payload)
    }

    fn multicast_frame(&self, opcode: Opcode, payload: &[u8]) -> usize {
        let frame = encode_frame(true, opcode, None, payload);
        self.adapter
            .sessions
            .iter()
            .filter(|entry| entry.value().is_handshaked())
            .filter(|entry| entry.value().transport().send_async(frame.clone()))
            .count()
    }
}

struct ConnState {
    handshaked: bool,
    request_codec: RequestCodec,
    http_src: BytesMut,
    engine: WsEngine,
}

struct WsServerAdapter {
    handler: Arc<dyn WsHandler>,
    states: DashMap<Uuid, Arc<Mutex<ConnState>>>,
    sessions: DashMap<Uuid, WsSession>,
}

impl WsServerAdapter {
    fn new(handler: Arc<dyn WsHandler>) -> Self {
        Self { handler, states: DashMap::new(), sessions: DashMap::new() }
    }

    async fn reject(&self, session: &WsSession, error: WsError) {
        debug!(id = %session.id(), %error, "websocket handshake rejected");
        self.handler.on_ws_error(session, &error).await;
        let response = HttpResponse::make_error_response(400, "WebSocket handshake failed!");
        let _ = session.transport().send(bytes::Bytes::copy_from_slice(response.cache())).await;
        session.transport().disconnect_async();
    }
}

#[async_trait]
impl SessionHandler for WsServerAdapter {
    async fn on_connected(&self, session: &SessionHandle) {
        let ws_session = WsSession::new(session.clone(), false);
        self.sessions.insert(session.id(), ws_session);
        self.states.insert(
            session.id(),
            Arc::new(Mutex::new(ConnState {
                handshaked: false,
                request_codec: RequestCodec::new(),
                http_src: BytesMut::new(),
                engine: WsEngine::server(),
            })),
        );
    }

    async fn on_received(&self, session: &SessionHandle, data: &[u8]) {
        let Some(state) = self.states.get(&session.id()).map(|entry| entry.value().clone()) else {
            return;
        };
        let Some(ws_session) = self.sessions.get(&session.id()).map(|entry| entry.value().clone())
        else {
            return;
        };

        let sink = EventSink::Handler(self.handler.clone());
        let mut guard = state.lock().await;
        let ConnState { handshaked, request_codec, http_src, engine } = &mut *guard;

        if !*handshaked {
            http_src.extend_from_slice(data);
            match request_codec.decode(http_src) {
                Ok(Some(request)) => match validate_upgrade_request(&request) {
                    Ok(sec_key) => {
                        *handshaked = true;
                        ws_session.set_handshaked();
                        let response = make_upgrade_response(&sec_key);
                        let _ = ws_session
                            .transport()
                            .send(bytes::Bytes::copy_from_slice(response.cache()))
                            .await;
                        debug!(id = %session.id(), "websocket handshake complete");
                        self.handler.on_ws_connected(&ws_session).await;

                        // bytes that arrived behind the upgrade request are
                        // already frame data
                        if !http_src.is_empty() {
                            let trailing = http_src.split();
                            engine.feed(&trailing);
                        }
                        drain_events(engine, &ws_session, &sink).await;
                    }
                    Err(error) => self.reject(&ws_session, error).await,
                },
                Ok(None) => {}
                Err(error) => self.reject(&ws_session, error.into()).await,
            }
        } else {
            engine.feed(data);
            drain_events(engine, &ws_session, &sink).await;
        }
    }

    async fn on_disconnected(&self, session: &SessionHandle) {
        self.states.remove(&session.id());
        if let Some((_, ws_session)) = self.sessions.remove(&session.id()) {
            self.handler.on_ws_disconnected(&ws_session).await;
        }
    }
}
