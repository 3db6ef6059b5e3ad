//! Error types for the WebSocket engine.

use tethys_http::ParseError;
use tethys_net::NetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    /// The upgrade exchange failed validation
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    /// A frame violated the protocol (reserved bits, unknown opcode,
    /// inconsistent fragmentation, masking rules)
    #[error("frame violation: {reason}")]
    Frame { reason: String },

    /// The HTTP bytes of the upgrade exchange were malformed
    #[error("handshake http error: {source}")]
    Http {
        #[from]
        source: ParseError,
    },

    /// Transport-level failure underneath the frames
    #[error("transport error: {source}")]
    Net {
        #[from]
        source: NetError,
    },

    /// The connection closed underneath a pending operation
    #[error("connection closed")]
    Closed,
}

impl WsError {
    /// Creates a new Handshake error
    pub fn handshake<S: ToString>(reason: S) -> Self {
        Self::Handshake { reason: reason.to_string() }
    }

    /// Creates a new Frame error
    pub fn frame<S: ToString>(reason: S) -> Self {
        Self::Frame { reason: reason.to_string() }
    }
}

impl From<std::io::Error> for WsError {
    fn from(source: std::io::Error) -> Self {
        Self::Net { source: NetError::Io { source } }
    }
}
