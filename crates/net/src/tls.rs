//! TLS overlay: the TCP session contract over a rustls-encrypted stream.
//!
//! Certificate management is the host's problem. A [`TlsContext`] wraps the
//! rustls configuration the host prepared; this module only applies it.
//! Handshake failures surface once through `on_error` with the TLS kind and
//! the session settles in `Disconnected` without ever reaching `Connected`.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::error;

use crate::endpoint::Endpoint;
use crate::error::{NetError, NetResult};
use crate::handler::SessionHandler;
use crate::options::{apply_stream_options, TcpOptions, TcpServerOptions};
use crate::session::{open_session, SessionHandle};
use crate::tcp::TcpServer;

/// Host-provided TLS configuration, consumed as-is.
#[derive(Clone)]
pub enum TlsContext {
    Server(Arc<ServerConfig>),
    Client { config: Arc<ClientConfig>, server_name: String },
}

impl TlsContext {
    pub fn server(config: Arc<ServerConfig>) -> Self {
        TlsContext::Server(config)
    }

    pub fn client(config: Arc<ClientConfig>, server_name: impl Into<String>) -> Self {
        TlsContext::Client { config: config.into(), server_name: server_name.into() }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, TlsContext::Server(_))
    }

    pub(crate) fn acceptor(&self) -> NetResult<TlsAcceptor> {
        match self {
            TlsContext::Server(config) => Ok(TlsAcceptor::from(config.clone())),
            TlsContext::Client { .. } => {
                Err(NetError::invalid_state("client TLS context used on the accept side"))
            }
        }
    }

    pub(crate) fn connector(&self) -> NetResult<(TlsConnector, ServerName<'static>)> {
        match self {
            TlsContext::Client { config, server_name } => {
                let name = ServerName::try_from(server_name.clone())
                    .map_err(|_| NetError::tls(format!("invalid server name {server_name}")))?;
                Ok((TlsConnector::from(config.clone()), name))
            }
            TlsContext::Server(_) => {
                Err(NetError::invalid_state("server TLS context used on the connect side"))
            }
        }
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsContext::Server(_) => f.write_str("TlsContext::Server"),
            TlsContext::Client { server_name, .. } => {
                f.debug_struct("TlsContext::Client").field("server_name", server_name).finish()
            }
        }
    }
}

/// A [`TcpServer`] whose accepted streams go through a TLS handshake
/// before the session opens. Everything else is delegated.
pub struct TlsServer {
    inner: TcpServer,
}

impl TlsServer {
    pub fn new(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        context: &TlsContext,
    ) -> NetResult<Self> {
        Self::with_options(endpoint, handler, context, TcpServerOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        context: &TlsContext,
        options: TcpServerOptions,
    ) -> NetResult<Self> {
        let acceptor = context.acceptor()?;
        Ok(Self { inner: TcpServer::with_tls_acceptor(endpoint, handler, options, acceptor) })
    }

    /// The underlying server; session table, multicast, lifecycle are all
    /// the plain TCP surface.
    pub fn server(&self) -> &TcpServer {
        &self.inner
    }

    /// Unwraps into the underlying server; overlays embed the result so
    /// TLS and plain transports share one surface.
    pub fn into_server(self) -> TcpServer {
        self.inner
    }

    pub async fn start(&self) -> NetResult<()> {
        self.inner.start().await
    }

    pub async fn stop(&self) {
        self.inner.stop().await
    }

    pub async fn restart(&self) -> NetResult<()> {
        self.inner.restart().await
    }
}

/// Outbound TLS connections; dials TCP then runs the client handshake.
pub struct TlsClient {
    endpoint: Endpoint,
    options: TcpOptions,
    handler: Arc<dyn SessionHandler>,
    context: TlsContext,
}

impl TlsClient {
    pub fn new(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        context: TlsContext,
    ) -> Self {
        Self::with_options(endpoint, handler, context, TcpOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        context: TlsContext,
        options: TcpOptions,
    ) -> Self {
        Self { endpoint: endpoint.into(), options, handler, context }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn connect(&self) -> NetResult<SessionHandle> {
        let (connector, server_name) = self.context.connector()?;

        let addr = self.endpoint.resolve().await?;
        let stream = TcpStream::connect(addr).await?;
        apply_stream_options(&stream, &self.options)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let tls_stream =
            connector.connect(server_name, stream).await.map_err(NetError::tls)?;

        let (session, write_rx) = SessionHandle::create(peer_addr, local_addr);
        open_session(
            tls_stream,
            session.clone(),
            write_rx,
            self.handler.clone(),
            self.options.clone(),
            None,
        )
        .await;
        Ok(session)
    }

    pub fn connect_async(&self) {
        let endpoint = self.endpoint.clone();
        let options = self.options.clone();
        let handler = self.handler.clone();
        let context = self.context.clone();
        tokio::spawn(async move {
            let client = TlsClient { endpoint, options, handler, context };
            if let Err(e) = client.connect().await {
                error!(endpoint = %client.endpoint, cause = %e, "tls connect failed");
            }
        });
    }
}
