//! Outbound TCP connections with the session I/O contract.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::error;

use crate::endpoint::Endpoint;
use crate::error::NetResult;
use crate::handler::SessionHandler;
use crate::options::{apply_stream_options, TcpOptions};
use crate::session::{open_session, SessionHandle};

/// Dials a peer and drives the resulting session through the same loops a
/// server-side session uses; the I/O contract is identical.
pub struct TcpClient {
    endpoint: Endpoint,
    options: TcpOptions,
    handler: Arc<dyn SessionHandler>,
}

impl TcpClient {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn SessionHandler>) -> Self {
        Self::with_options(endpoint, handler, TcpOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        options: TcpOptions,
    ) -> Self {
        Self { endpoint: endpoint.into(), options, handler }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connects and returns the session handle once `on_connected` fired.
    pub async fn connect(&self) -> NetResult<SessionHandle> {
        let addr = self.endpoint.resolve().await?;
        let stream = TcpStream::connect(addr).await?;
        apply_stream_options(&stream, &self.options)?;

        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (session, write_rx) = SessionHandle::create(peer_addr, local_addr);
        open_session(stream, session.clone(), write_rx, self.handler.clone(), self.options.clone(), None)
            .await;
        Ok(session)
    }

    /// Fire-and-forget connect; the outcome arrives through the handler
    /// callbacks. Dial failures have no session to report on and are
    /// logged.
    pub fn connect_async(&self) {
        let endpoint = self.endpoint.clone();
        let options = self.options.clone();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let client = TcpClient { endpoint, options, handler };
            if let Err(e) = client.connect().await {
                error!(endpoint = %client.endpoint, cause = %e, "connect failed");
            }
        });
    }
}
