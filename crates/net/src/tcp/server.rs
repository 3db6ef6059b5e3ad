//! Accepting server with a concurrent session table.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::{NetError, NetResult};
use crate::handler::SessionHandler;
use crate::options::{apply_stream_options, bind_listener, TcpServerOptions};
use crate::session::{fail_session, open_session, SessionHandle, SessionTable};
use crate::state::{AtomicServerState, ServerState};

/// One running acceptor's control surface; replaced on every start.
struct AcceptorRun {
    cancel: CancellationToken,
    done: mpsc::Receiver<()>,
}

struct ServerShared {
    state: AtomicServerState,
    sessions: SessionTable,
    run: Mutex<Option<AcceptorRun>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// A TCP server: accepts peers, registers each one in the session table
/// under its id, and fans events out to the shared [`SessionHandler`].
///
/// A session is present in the table exactly while it is `Connected`; the
/// table supports lookup and snapshot iteration concurrently with accepts
/// and disconnects.
pub struct TcpServer {
    endpoint: Endpoint,
    options: TcpServerOptions,
    handler: Arc<dyn SessionHandler>,
    tls: Option<TlsAcceptor>,
    shared: Arc<ServerShared>,
}

impl TcpServer {
    pub fn new(endpoint: impl Into<Endpoint>, handler: Arc<dyn SessionHandler>) -> Self {
        Self::with_options(endpoint, handler, TcpServerOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        options: TcpServerOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
            handler,
            tls: None,
            shared: Arc::new(ServerShared {
                state: AtomicServerState::new(),
                sessions: Arc::new(DashMap::new()),
                run: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn with_tls_acceptor(
        endpoint: impl Into<Endpoint>,
        handler: Arc<dyn SessionHandler>,
        options: TcpServerOptions,
        acceptor: TlsAcceptor,
    ) -> Self {
        let mut server = Self::with_options(endpoint, handler, options);
        server.tls = Some(acceptor);
        server
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bound address, available once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    pub fn find_session(&self, id: Uuid) -> Option<SessionHandle> {
        self.shared.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the currently connected sessions.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.shared.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Binds the acceptor and starts accepting peers.
    pub async fn start(&self) -> NetResult<()> {
        let state = &self.shared.state;
        if !state.transition(ServerState::Created, ServerState::Starting)
            && !state.transition(ServerState::Stopped, ServerState::Starting)
        {
            return Err(NetError::invalid_state(format!(
                "cannot start server in state {:?}",
                state.load()
            )));
        }

        let addr = match self.endpoint.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                state.store(ServerState::Stopped);
                return Err(e);
            }
        };
        let listener = match bind_listener(addr, &self.options) {
            Ok(listener) => listener,
            Err(e) => {
                state.store(ServerState::Stopped);
                return Err(e.into());
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                state.store(ServerState::Stopped);
                return Err(e.into());
            }
        };
        *self.shared.local_addr.lock().unwrap() = Some(local_addr);
        info!(%local_addr, "server listening");

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = mpsc::channel(1);
        *self.shared.run.lock().unwrap() = Some(AcceptorRun { cancel: cancel.clone(), done: done_rx });

        let handler = self.handler.clone();
        let options = self.options.clone();
        let sessions = self.shared.sessions.clone();
        let tls = self.tls.clone();
        tokio::spawn(async move {
            accept_loop(listener, handler, options, sessions, tls, cancel).await;
            drop(done_tx);
        });

        state.store(ServerState::Started);
        Ok(())
    }

    /// Stops accepting, disconnects every session, and waits for the
    /// acceptor to wind down.
    pub async fn stop(&self) {
        let state = &self.shared.state;
        if !state.transition(ServerState::Started, ServerState::Stopping) {
            return;
        }

        let run = self.shared.run.lock().unwrap().take();
        if let Some(mut run) = run {
            run.cancel.cancel();
            self.disconnect_all().await;
            // the sender side drops when the accept loop returns
            let _ = run.done.recv().await;
        }

        state.store(ServerState::Stopped);
        info!(endpoint = %self.endpoint, "server stopped");
    }

    /// `stop` followed by `start`, preserving address and options.
    pub async fn restart(&self) -> NetResult<()> {
        self.stop().await;
        self.start().await
    }

    /// Enqueues `data` on every connected session. Returns how many
    /// sessions accepted the payload. Iteration runs over a snapshot, so
    /// concurrent accepts and disconnects do not disturb it.
    pub fn multicast(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let snapshot: Vec<SessionHandle> =
            self.shared.sessions.iter().map(|entry| entry.value().clone()).collect();
        snapshot.iter().filter(|session| session.send_async(data.clone())).count()
    }

    /// Disconnects every session and waits for each teardown.
    pub async fn disconnect_all(&self) {
        let snapshot: Vec<SessionHandle> =
            self.shared.sessions.iter().map(|entry| entry.value().clone()).collect();
        for session in snapshot {
            session.disconnect().await;
        }
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    handler: Arc<dyn SessionHandler>,
    options: TcpServerOptions,
    sessions: SessionTable,
    tls: Option<TlsAcceptor>,
    cancel: CancellationToken,
) {
    let mut backoff = 1u64;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("acceptor cancelled");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                if backoff > 64 {
                    error!(cause = %e, "giving up accepting connections");
                    break;
                }
                warn!(cause = %e, backoff, "accept failed, backing off");
                time::sleep(Duration::from_secs(backoff)).await;
                backoff *= 2;
                continue;
            }
        };
        backoff = 1;

        if let Err(e) = apply_stream_options(&stream, &options.tcp) {
            warn!(cause = %e, %peer_addr, "failed to apply socket options");
        }
        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(cause = %e, "accepted socket vanished");
                continue;
            }
        };

        debug!(%peer_addr, "accepted connection");
        let (session, write_rx) = SessionHandle::create(peer_addr, local_addr);
        let handler = handler.clone();
        let tcp_options = options.tcp.clone();
        let table = sessions.clone();
        let tls = tls.clone();

        tokio::spawn(async move {
            match tls {
                None => {
                    open_session(stream, session, write_rx, handler, tcp_options, Some(table)).await;
                }
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        open_session(tls_stream, session, write_rx, handler, tcp_options, Some(table))
                            .await;
                    }
                    Err(e) => {
                        fail_session(session, handler, NetError::tls(e)).await;
                    }
                },
            }
        });
    }
}
