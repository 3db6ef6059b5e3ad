use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tethys_ws::{encode_frame, Opcode, WsClient, WsEvent, WsHandler, WsServer, WsSession};

/// Echoes data messages; reports closes to the test body.
struct EchoWs {
    closes: mpsc::UnboundedSender<(u16, Vec<u8>)>,
}

#[async_trait]
impl WsHandler for EchoWs {
    async fn on_ws_received(&self, session: &WsSession, opcode: Opcode, payload: &[u8]) {
        match opcode {
            Opcode::Text => {
                session.send_text_async(&String::from_utf8_lossy(payload));
            }
            _ => {
                session.send_binary_async(payload);
            }
        }
    }

    async fn on_ws_close(&self, _session: &WsSession, status: u16, reason: &[u8]) {
        let _ = self.closes.send((status, reason.to_vec()));
    }
}

async fn started_echo_server() -> (WsServer, SocketAddr, mpsc::UnboundedReceiver<(u16, Vec<u8>)>) {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).try_init();
    let (closes_tx, closes_rx) = mpsc::unbounded_channel();
    let server = WsServer::new(
        "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        Arc::new(EchoWs { closes: closes_tx }),
    );
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr, closes_rx)
}

#[tokio::test]
async fn text_echo_roundtrip() {
    let (server, addr, _closes) = started_echo_server().await;

    let client = WsClient::new(addr, "/ws");
    let mut connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();
    assert!(connection.session().is_handshaked());

    connection.session().send_text("hello websocket").await.unwrap();
    let echoed = timeout(Duration::from_secs(5), connection.receive_text()).await.unwrap().unwrap();
    assert_eq!(echoed, "hello websocket");

    connection.close(1000, b"done").await;
    server.stop().await;
}

#[tokio::test]
async fn binary_echo_roundtrip() {
    let (server, addr, _closes) = started_echo_server().await;

    let client = WsClient::new(addr, "/ws");
    let mut connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    connection.session().send_binary(&payload).await.unwrap();
    let echoed = timeout(Duration::from_secs(5), connection.receive_binary()).await.unwrap().unwrap();
    assert_eq!(&echoed[..], &payload[..]);

    connection.close(1000, b"done").await;
    server.stop().await;
}

#[tokio::test]
async fn ping_is_answered_with_identical_payload() {
    let (server, addr, _closes) = started_echo_server().await;

    let client = WsClient::new(addr, "/ws");
    let mut connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();

    connection.session().send_ping(b"probe").await.unwrap();

    let pong = timeout(Duration::from_secs(5), async {
        loop {
            match connection.receive().await {
                Some(WsEvent::Pong(payload)) => return payload,
                Some(_) => continue,
                None => panic!("connection closed before the pong"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(&pong[..], b"probe");

    connection.close(1000, b"done").await;
    server.stop().await;
}

/// Replies to any text with "Hello" fragmented into two frames with a PING
/// in between.
struct Fragmenter;

#[async_trait]
impl WsHandler for Fragmenter {
    async fn on_ws_received(&self, session: &WsSession, _opcode: Opcode, _payload: &[u8]) {
        let transport = session.transport();
        transport.send_async(encode_frame(false, Opcode::Text, None, b"Hel"));
        transport.send_async(encode_frame(true, Opcode::Ping, None, b"mid"));
        transport.send_async(encode_frame(true, Opcode::Continuation, None, b"lo"));
    }
}

#[tokio::test]
async fn fragmented_message_with_interleaved_ping() {
    let server = WsServer::new("127.0.0.1:0".parse::<SocketAddr>().unwrap(), Arc::new(Fragmenter));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let client = WsClient::new(addr, "/ws");
    let mut connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();
    connection.session().send_text("go").await.unwrap();

    // the interleaved PING surfaces before the message completes
    let first = timeout(Duration::from_secs(5), connection.receive()).await.unwrap().unwrap();
    match first {
        WsEvent::Ping(payload) => assert_eq!(&payload[..], b"mid"),
        other => panic!("expected the interleaved ping first, got {other:?}"),
    }

    let message = timeout(Duration::from_secs(5), connection.receive_text()).await.unwrap().unwrap();
    assert_eq!(message, "Hello");

    connection.close(1000, b"done").await;
    server.stop().await;
}

#[tokio::test]
async fn close_reaches_the_server_then_disconnects() {
    let (server, addr, mut closes) = started_echo_server().await;

    let client = WsClient::new(addr, "/ws");
    let connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();

    connection.close(1000, b"bye").await;

    let (status, reason) = timeout(Duration::from_secs(5), closes.recv()).await.unwrap().unwrap();
    assert_eq!(status, 1000);
    assert_eq!(reason, b"bye");

    // the server-side transport session winds down to Disconnected
    timeout(Duration::from_secs(5), async {
        while server.server().session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn multicast_reaches_handshaked_sessions() {
    let (server, addr, _closes) = started_echo_server().await;

    let client_a = WsClient::new(addr, "/ws");
    let client_b = WsClient::new(addr, "/ws");
    let mut connection_a = timeout(Duration::from_secs(5), client_a.connect()).await.unwrap().unwrap();
    let mut connection_b = timeout(Duration::from_secs(5), client_b.connect()).await.unwrap().unwrap();

    let reached = server.multicast_text("fan out");
    assert_eq!(reached, 2);

    assert_eq!(connection_a.receive_text().await.unwrap(), "fan out");
    assert_eq!(connection_b.receive_text().await.unwrap(), "fan out");

    connection_a.close(1000, b"done").await;
    connection_b.close(1000, b"done").await;
    server.stop().await;
}

#[tokio::test]
async fn raw_handshake_uses_the_rfc_accept_key() {
    let (server, addr, _closes) = started_echo_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /chat HTTP/1.1\r\n\
              Host: example.com\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .await
        .unwrap();

    let mut buffer = vec![0u8; 1024];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buffer)).await.unwrap().unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);

    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    server.stop().await;
}

#[tokio::test]
async fn invalid_upgrade_is_answered_with_400() {
    let (server, addr, _closes) = started_echo_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /chat HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    let mut buffer = vec![0u8; 1024];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buffer)).await.unwrap().unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));

    server.stop().await;
}

#[tokio::test]
async fn large_message_roundtrip() {
    let (server, addr, _closes) = started_echo_server().await;

    let client = WsClient::new(addr, "/ws");
    let mut connection = timeout(Duration::from_secs(5), client.connect()).await.unwrap().unwrap();

    // 70,000 bytes exercises the 64-bit length encoding end to end
    let payload = Bytes::from(vec![0x5Au8; 70_000]);
    connection.session().send_binary(&payload).await.unwrap();
    let echoed = timeout(Duration::from_secs(10), connection.receive_binary()).await.unwrap().unwrap();
    assert_eq!(echoed.len(), 70_000);
    assert_eq!(&echoed[..], &payload[..]);

    connection.close(1000, b"done").await;
    server.stop().await;
}
