use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use tethys_http::{HttpClient, HttpHandler, HttpRequest, HttpResponse, HttpServer, HttpSession};

/// Serves a few fixed routes the way a host application would.
struct Routes;

#[async_trait]
impl HttpHandler for Routes {
    async fn on_request(&self, session: &HttpSession, request: &HttpRequest) {
        let response = match (request.method(), request.url()) {
            ("GET", "/hello") => HttpResponse::make_get_response(b"hello world", "text/plain"),
            ("POST", "/echo") => HttpResponse::make_get_response(request.body(), "text/plain"),
            ("OPTIONS", _) => HttpResponse::make_options_response("GET, POST, OPTIONS"),
            _ => HttpResponse::make_error_response(404, "no such route"),
        };
        let _ = session.send_response(&response).await;
    }
}

async fn started_server() -> (HttpServer, SocketAddr) {
    let server = HttpServer::new("127.0.0.1:0".parse::<SocketAddr>().unwrap(), Arc::new(Routes));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

#[tokio::test]
async fn get_roundtrip() {
    let (server, addr) = started_server().await;

    let client = HttpClient::new(addr);
    let request = HttpRequest::make_get_request("/hello");
    let response = timeout(Duration::from_secs(5), client.request(&request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.header_value("content-type"), Some("text/plain"));
    assert_eq!(response.body_as_string(), "hello world");

    server.stop().await;
}

#[tokio::test]
async fn post_body_is_echoed() {
    let (server, addr) = started_server().await;

    let client = HttpClient::new(addr);
    let request = HttpRequest::make_post_request("/echo", b"ping-pong", "text/plain");
    let response = timeout(Duration::from_secs(5), client.request(&request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"ping-pong");

    server.stop().await;
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (server, addr) = started_server().await;

    let client = HttpClient::new(addr);
    let request = HttpRequest::make_get_request("/missing");
    let response = timeout(Duration::from_secs(5), client.request(&request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.status_phrase(), "Not Found");

    server.stop().await;
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let (server, addr) = started_server().await;

    struct Collect {
        tx: tokio::sync::mpsc::UnboundedSender<HttpResponse>,
    }

    #[async_trait]
    impl tethys_http::HttpClientHandler for Collect {
        async fn on_response(&self, _session: &HttpSession, response: &HttpResponse) {
            let _ = self.tx.send(response.clone());
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let client = HttpClient::new(addr);
    let session = client.connect_with(Arc::new(Collect { tx })).await.unwrap();

    session.send_request(&HttpRequest::make_get_request("/hello")).await.unwrap();
    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.body_as_string(), "hello world");

    // the same connection serves the next request
    session.send_request(&HttpRequest::make_post_request("/echo", b"again", "text/plain")).await.unwrap();
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.body_as_string(), "again");

    session.disconnect().await;
    server.stop().await;
}
