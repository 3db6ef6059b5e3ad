//! TCP server and client transports.

mod client;
mod server;

pub use client::TcpClient;
pub use server::TcpServer;
