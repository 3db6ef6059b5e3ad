//! HTTP client overlay: sends built requests, parses responses
//! incrementally across reads.
//!
//! There is deliberately no connection pooling; a client owns at most the
//! sessions it explicitly connected. The one-shot [`HttpClient::request`]
//! helper dials, sends, awaits the complete response (including bodies
//! that only end when the server closes), and tears the session down.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::Decoder;
use tracing::debug;
use uuid::Uuid;

use tethys_net::{Endpoint, NetResult, SessionHandle, SessionHandler, TcpClient, TcpOptions, TlsClient, TlsContext};

use crate::codec::ResponseCodec;
use crate::error::{HttpError, ParseError};
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::session::HttpSession;

/// Message-level events of an HTTP client connection.
#[async_trait]
pub trait HttpClientHandler: Send + Sync + 'static {
    /// A complete response arrived.
    async fn on_response(&self, session: &HttpSession, response: &HttpResponse);

    /// The bytes on the wire violated HTTP framing; `response` is the
    /// partially parsed message. The session closes after this callback.
    async fn on_response_error(
        &self,
        _session: &HttpSession,
        _response: &HttpResponse,
        _error: &ParseError,
    ) {
    }

    async fn on_connected(&self, _session: &HttpSession) {}

    async fn on_disconnected(&self, _session: &HttpSession) {}
}

pub struct HttpClient {
    endpoint: Endpoint,
    options: TcpOptions,
    tls: Option<TlsContext>,
}

impl HttpClient {
    pub fn new(endpoint: impl Into<Endpoint>) -> Self {
        Self { endpoint: endpoint.into(), options: TcpOptions::default(), tls: None }
    }

    pub fn with_options(endpoint: impl Into<Endpoint>, options: TcpOptions) -> Self {
        Self { endpoint: endpoint.into(), options, tls: None }
    }

    /// HTTPS: dial through the host's TLS context.
    pub fn with_tls(endpoint: impl Into<Endpoint>, context: TlsContext) -> Self {
        Self { endpoint: endpoint.into(), options: TcpOptions::default(), tls: Some(context) }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connects and routes parsed responses to `handler`.
    pub async fn connect_with(&self, handler: Arc<dyn HttpClientHandler>) -> NetResult<HttpSession> {
        let adapter: Arc<dyn SessionHandler> = Arc::new(ClientAdapter::new(handler));
        let transport = match &self.tls {
            None => TcpClient::with_options(self.endpoint.clone(), adapter, self.options.clone())
                .connect()
                .await?,
            Some(context) => TlsClient::with_options(
                self.endpoint.clone(),
                adapter,
                context.clone(),
                self.options.clone(),
            )
            .connect()
            .await?,
        };
        Ok(HttpSession::new(transport))
    }

    /// One-shot request/response exchange.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let (tx, rx) = oneshot::channel();
        let capture = Arc::new(Capture { tx: StdMutex::new(Some(tx)) });

        let session = self.connect_with(capture).await?;
        session.send_request(request).await?;

        let outcome = rx.await.map_err(|_| HttpError::ConnectionClosed)?;
        session.disconnect().await;
        outcome
    }
}

struct ConnState {
    codec: ResponseCodec,
    src: BytesMut,
}

struct ClientAdapter {
    handler: Arc<dyn HttpClientHandler>,
    states: DashMap<Uuid, Arc<Mutex<ConnState>>>,
}

impl ClientAdapter {
    fn new(handler: Arc<dyn HttpClientHandler>) -> Self {
        Self { handler, states: DashMap::new() }
    }

    fn state_of(&self, id: Uuid) -> Option<Arc<Mutex<ConnState>>> {
        self.states.get(&id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl SessionHandler for ClientAdapter {
    async fn on_connected(&self, session: &SessionHandle) {
        self.states.insert(
            session.id(),
            Arc::new(Mutex::new(ConnState { codec: ResponseCodec::new(), src: BytesMut::new() })),
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
                Ok(Some(response)) => {
                    self.handler.on_response(&http_session, &response).await;
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(id = %session.id(), %error, "response parse violation");
                    let partial = codec.message().clone();
                    self.handler.on_response_error(&http_session, &partial, &error).await;
                    session.disconnect_async();
                    break;
                }
            }
        }
    }

    async fn on_disconnected(&self, session: &SessionHandle) {
        // a body framed by connection close completes here
        if let Some((_, state)) = self.states.remove(&session.id()) {
            let mut guard = state.lock().await;
            let ConnState { codec, src } = &mut *guard;
            if let Ok(Some(response)) = codec.decode_eof(src) {
                self.handler.on_response(&HttpSession::new(session.clone()), &response).await;
            }
        }
        self.handler.on_disconnected(&HttpSession::new(session.clone())).await;
    }
}

/// Routes the first response (or failure) into a oneshot for
/// [`HttpClient::request`].
struct Capture {
    tx: StdMutex<Option<oneshot::Sender<Result<HttpResponse, HttpError>>>>,
}

impl Capture {
    fn settle(&self, outcome: Result<HttpResponse, HttpError>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl HttpClientHandler for Capture {
    async fn on_response(&self, _session: &HttpSession, response: &HttpResponse) {
        self.settle(Ok(response.clone()));
    }

    async fn on_response_error(
        &self,
        _session: &HttpSession,
        _response: &HttpResponse,
        error: &ParseError,
    ) {
        self.settle(Err(error.clone().into()));
    }

    async fn on_disconnected(&self, _session: &HttpSession) {
        self.settle(Err(HttpError::ConnectionClosed));
    }
}
