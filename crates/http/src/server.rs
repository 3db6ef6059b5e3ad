//! HTTP server overlay: binds the request codec to accepted sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tethys_net::{
    Endpoint, NetResult, ServerState, SessionHandle, SessionHandler, TcpServer, TcpServerOptions,
    TlsContext, TlsServer,
};
use tokio_util::codec::Decoder;

use crate::codec::RequestCodec;
use crate::error::ParseError;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::session::HttpSession;

/// Message-level events of an HTTP server.
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    /// A complete request arrived on the session.
    async fn on_request(&self, session: &HttpSession, request: &HttpRequest);

    /// The bytes on the wire violated HTTP framing; `request` is the
    /// partially parsed message. The server answers with a `400` and
    /// closes the session after this callback.
    async fn on_request_error(
        &self,
        _session: &HttpSession,
        _request: &HttpRequest,
        _error: &ParseError,
    ) {
    }

    async fn on_connected(&self, _session: &HttpSession) {}

    async fn on_disconnected(&self, _session: &HttpSession) {}
}

/// An HTTP/1.1 server over the TCP transport; with a [`TlsContext`] it is
/// the same server over TLS. Keep-alive is the default: the codec re-arms
/// after every parsed request until a peer or handler closes the session.
pub struct HttpServer {
    core: TcpServer,
}

impl HttpServer {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn HttpHandler>) -> Self {
        Self::with_options(endpoint, handler, TcpServerOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn HttpHandler>,
        options: TcpServerOptions,
    ) -> Self {
        let adapter = Arc::new(ServerAdapter::new(handler));
        Self { core: TcpServer::with_options(endpoint, adapter, options) }
    }

    /// HTTPS: the same surface with the host's TLS context applied.
    pub fn with_tls(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn HttpHandler>,
        context: &TlsContext,
        options: TcpServerOptions,
    ) -> NetResult<Self> {
        let adapter = Arc::new(ServerAdapter::new(handler));
        let tls = TlsServer::with_options(endpoint, adapter, context, options)?;
        Ok(Self { core: tls.into_server() })
    }

    /// The underlying transport server: session table, multicast,
    /// `disconnect_all`, `find_session`.
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
}

struct ConnState {
    codec: RequestCodec,
    src: BytesMut,
}

struct ServerAdapter {
    handler: Arc<dyn HttpHandler>,
    states: DashMap<Uuid, Arc<Mutex<ConnState>>>,
}

impl ServerAdapter {
    fn new(handler: Arc<dyn HttpHandler>) -> Self {
        Self { handler, states: DashMap::new() }
    }

    fn state_of(&self, id: Uuid) -> Option<Arc<Mutex<ConnState>>> {
        self.states.get(&id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl SessionHandler for ServerAdapter {
    async fn on_connected(&self, session: &SessionHandle) {
        self.states.insert(
            session.id(),
            Arc::new(Mutex::new(ConnState { codec: RequestCodec::new(), src: BytesMut::new() })),
        );
        self.handler.on_connected(&HttpSession::new(session.clone())).await;
    }

    async fn on_received(&self, session: &SessionHandle, data: &[u8]) {
        let Some(state) = self.state_of(session.id()) else {
            return;
        };
        let http_session = HttpSession::new(session.clone());
        let mut guard = state.lock().await;
        let ConnState { codec, src } = &mut *guard;
        src.extend_from_slice(data);

        loop {
            match codec.decode(src) {
                Ok(Some(request)) => {
                    self.handler.on_request(&http_session, &request).await;
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(id = %session.id(), %error, "request parse violation");
                    let partial = codec.message().clone();
                    self.handler.on_request_error(&http_session, &partial, &error).await;
                    let response = HttpResponse::make_error_response(400, "Invalid HTTP request");
                    let _ = http_session.send_response(&response).await;
                    session.disconnect_async();
                    break;
                }
            }
        }
    }

    async fn on_disconnected(&self, session: &SessionHandle) {
        self.states.remove(&session.id());
        self.handler.on_disconnected(&HttpSession::new(session.clone())).await;
    }
}
