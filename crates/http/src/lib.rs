//! HTTP/1.1 engine: an incremental, resumable message codec plus session
//! overlays that bind it to the transport core.
//!
//! [`HttpRequest`] and [`HttpResponse`] are symmetric builder/parser
//! objects over a single owning byte cache: setters emit wire bytes as they
//! are called, and the parser resumes from where the previous network read
//! left off, so feeding a message split at any byte boundary costs O(new
//! bytes). [`HttpServer`] and [`HttpClient`] apply the codec to sessions
//! and route complete messages to handler objects.

pub mod client;
pub mod codec;
pub mod cookie;
pub mod error;
pub mod mime;
pub mod request;
pub mod response;
pub mod server;
pub mod session;

mod wire;

pub use client::{HttpClient, HttpClientHandler};
pub use codec::{RequestCodec, ResponseCodec};
pub use cookie::CookieOptions;
pub use error::{HttpError, ParseError};
pub use mime::content_type_for_extension;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use server::{HttpHandler, HttpServer};
pub use session::HttpSession;

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
