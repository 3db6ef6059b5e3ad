//! Endpoint resolution and binding records.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

use crate::error::{NetError, NetResult};

/// An address a server binds to or a client dials: either an already
/// concrete socket address or a host name resolved at use time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Addr(SocketAddr),
    Host { host: String, port: u16 },
}

impl Endpoint {
    /// Builds an endpoint from a host string and port. IP literals skip
    /// DNS resolution later.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        match host.parse::<IpAddr>() {
            Ok(ip) => Endpoint::Addr(SocketAddr::new(ip, port)),
            Err(_) => Endpoint::Host { host, port },
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Endpoint::Addr(addr) => addr.port(),
            Endpoint::Host { port, .. } => *port,
        }
    }

    /// The host part, as written. For address endpoints this is the IP text.
    pub fn host(&self) -> String {
        match self {
            Endpoint::Addr(addr) => addr.ip().to_string(),
            Endpoint::Host { host, .. } => host.clone(),
        }
    }

    /// Resolves to the first usable socket address.
    pub async fn resolve(&self) -> NetResult<SocketAddr> {
        match self {
            Endpoint::Addr(addr) => Ok(*addr),
            Endpoint::Host { host, port } => lookup_host((host.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| NetError::resolve(format!("no addresses for {host}:{port}"))),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Addr(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Addr(addr) => write!(f, "{addr}"),
            Endpoint::Host { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_literal_is_concrete() {
        let endpoint = Endpoint::new("127.0.0.1", 8080);
        assert!(matches!(endpoint, Endpoint::Addr(_)));
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn host_name_defers_resolution() {
        let endpoint = Endpoint::new("example.com", 443);
        assert!(matches!(endpoint, Endpoint::Host { .. }));
        assert_eq!(endpoint.host(), "example.com");
    }

    #[tokio::test]
    async fn resolve_loopback() {
        let endpoint = Endpoint::new("localhost", 9000);
        let addr = endpoint.resolve().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9000);
    }
}
