//! Transport core: asynchronous TCP/UDP/TLS sessions with explicit lifecycle
//! callbacks.
//!
//! A [`TcpServer`] accepts peers and registers each one in a concurrent
//! session table keyed by a stable [`uuid::Uuid`]. Every connected peer is
//! driven by a pair of I/O loops and surfaces its life through a
//! [`SessionHandler`]: `on_connected`, `on_received`, `on_sent`, `on_empty`,
//! `on_error`, `on_disconnected`. The same loops drive outbound
//! [`TcpClient`] connections and the TLS overlays, so the I/O contract is
//! identical across transports.

pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod options;
pub mod session;
pub mod state;
pub mod tcp;
pub mod tls;
pub mod udp;

pub use buffer::Buffer;
pub use endpoint::Endpoint;
pub use error::{NetError, NetResult};
pub use handler::{DatagramHandler, SessionHandler};
pub use options::{TcpOptions, TcpServerOptions, UdpOptions};
pub use session::SessionHandle;
pub use state::{ServerState, SessionState};
pub use tcp::{TcpClient, TcpServer};
pub use tls::{TlsClient, TlsContext, TlsServer};
pub use udp::{UdpClient, UdpHandle, UdpServer};
