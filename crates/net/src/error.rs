//! Error types for the transport core.
//!
//! The kinds mirror the failure domains of the library: socket I/O, TLS,
//! address resolution, and lifecycle misuse. Lifecycle misuse on the data
//! path (`send` on a dead session) is deliberately *not* an error: those
//! calls return `0`/`false` so a handler can never blow up the I/O pump.

use std::io;
use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

/// The top-level error type for transport operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket-level failure (refused, reset, broken pipe, ...)
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// TLS handshake or record-layer failure
    #[error("tls error: {reason}")]
    Tls { reason: String },

    /// Endpoint could not be resolved to a socket address
    #[error("address resolution failed: {reason}")]
    Resolve { reason: String },

    /// Operation is invalid for the current session/server state
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// A user handler panicked; the panic was caught at the callback seam
    #[error("handler panicked: {reason}")]
    HandlerPanic { reason: String },
}

impl NetError {
    /// Creates a new Tls error
    pub fn tls<S: ToString>(reason: S) -> Self {
        Self::Tls { reason: reason.to_string() }
    }

    /// Creates a new Resolve error
    pub fn resolve<S: ToString>(reason: S) -> Self {
        Self::Resolve { reason: reason.to_string() }
    }

    /// Creates a new InvalidState error
    pub fn invalid_state<S: ToString>(reason: S) -> Self {
        Self::InvalidState { reason: reason.to_string() }
    }

    /// Creates a new HandlerPanic error
    pub fn handler_panic<S: ToString>(reason: S) -> Self {
        Self::HandlerPanic { reason: reason.to_string() }
    }
}
