//! WebSocket engine: RFC 6455 frame codec, opening handshake, and session
//! overlays bridging the HTTP upgrade to frame I/O.
//!
//! Version 13 only, no extensions. A [`WsServer`] upgrades HTTP requests in
//! place and fans frames out to a [`WsHandler`]; a [`WsClient`] dials,
//! proves the accept key, and then exchanges frames either through a
//! handler or through the queue-mode [`WsConnection`] helpers. TLS variants
//! (WSS) take a host-provided [`tethys_net::TlsContext`].

pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod server;
pub mod session;

pub use client::{WsClient, WsConnection};
pub use codec::{Frame, FrameDecoder};
pub use error::WsError;
pub use frame::{apply_mask, encode_frame, random_mask_key, FrameHeader, Opcode};
pub use handshake::{derive_accept_key, generate_sec_key, WS_GUID, WS_VERSION};
pub use server::WsServer;
pub use session::{WsEvent, WsHandler, WsSession, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};
