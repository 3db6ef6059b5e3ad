//! Error types for HTTP message parsing.
//!
//! A structural violation never panics and never throws through the I/O
//! pump: the owning message sets its error flag, keeps the offending bytes
//! in its cache for inspection, and the codec reports a [`ParseError`]
//! upwards once.

use tethys_net::NetError;
use thiserror::Error;

/// The top-level error type for HTTP operations.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport-level failure underneath the message exchange
    #[error("transport error: {source}")]
    Net {
        #[from]
        source: NetError,
    },

    /// The peer's bytes violated HTTP framing
    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    /// The connection closed before a response arrived
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

/// Errors raised while parsing an HTTP/1.1 message.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// Request or status line does not have its three parts
    #[error("invalid start line: {reason}")]
    InvalidStartLine { reason: String },

    /// Header line without a separator, or with an empty name
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    /// Status code contains a non-ASCII-digit byte
    #[error("invalid status code: {reason}")]
    InvalidStatus { reason: String },

    /// Content-Length is not a plain ASCII decimal number
    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    /// I/O failure while feeding the parser
    #[error("io error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for ParseError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { reason: source.to_string() }
    }
}

impl ParseError {
    /// Creates a new InvalidStartLine error
    pub fn invalid_start_line<S: ToString>(reason: S) -> Self {
        Self::InvalidStartLine { reason: reason.to_string() }
    }

    /// Creates a new InvalidHeader error
    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    /// Creates a new InvalidStatus error
    pub fn invalid_status<S: ToString>(reason: S) -> Self {
        Self::InvalidStatus { reason: reason.to_string() }
    }

    /// Creates a new InvalidContentLength error
    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }
}
