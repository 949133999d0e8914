//! End-to-end tests: client -> proxy -> backend chosen by function name

use mfproxy::config::BackendConfig;
use mfproxy::proxy::backend::RouteTable;
use mfproxy::proxy::upstream::ProxyHandler;
use mfproxy::server::listener::serve;
use mfproxy::sniff::SniffSettings;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Backend that reads one HTTP head (or everything, for non-HTTP clients),
/// answers with `<tag>:` followed by the exact bytes it received, and closes.
async fn spawn_echo_backend(tag: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    received.extend_from_slice(&buf[..n]);
                    if received.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                socket.write_all(tag.as_bytes()).await.unwrap();
                socket.write_all(b":").await.unwrap();
                socket.write_all(&received).await.unwrap();
                socket.shutdown().await.unwrap();
            });
        }
    });

    addr
}

/// Backend that greets first and never waits for the client.
async fn spawn_greeting_backend(greeting: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(greeting).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    addr
}

fn backend_config(addr: SocketAddr, name: &str) -> BackendConfig {
    BackendConfig {
        url: format!("tcp://{}", addr),
        name: Some(name.to_string()),
    }
}

async fn spawn_proxy(routes: RouteTable, sniff_timeout: Duration) -> SocketAddr {
    let handler = Arc::new(ProxyHandler::new(
        routes,
        SniffSettings::default(),
        Duration::from_secs(1),
        sniff_timeout,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, handler));
    addr
}

async fn two_function_proxy() -> SocketAddr {
    let billing = spawn_echo_backend("billing").await;
    let fallback = spawn_echo_backend("default").await;

    let mut routes = HashMap::new();
    routes.insert("billing".to_string(), vec![backend_config(billing, "billing-1")]);
    let table = RouteTable::new(routes, vec![backend_config(fallback, "default")]);

    spawn_proxy(table, Duration::from_secs(2)).await
}

async fn round_trip(proxy: SocketAddr, request: &[u8], half_close: bool) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request).await.unwrap();
    if half_close {
        client.shutdown().await.unwrap();
    }

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_routes_by_function_name() {
    let proxy = two_function_proxy().await;
    let request = b"GET /svc?mfname=billing&x=1 HTTP/1.1\r\nHost: a\r\n\r\n";

    let response = round_trip(proxy, request, false).await;

    let mut expected = b"billing:".to_vec();
    expected.extend_from_slice(request);
    assert_eq!(response, expected);
}

#[tokio::test]
async fn test_missing_parameter_uses_default_pool() {
    let proxy = two_function_proxy().await;
    let request = b"POST /svc HTTP/1.1\r\nHost: a\r\n\r\n";

    let response = round_trip(proxy, request, false).await;

    assert!(response.starts_with(b"default:"));
    assert_eq!(&response[b"default:".len()..], request);
}

#[tokio::test]
async fn test_unknown_function_uses_default_pool() {
    let proxy = two_function_proxy().await;
    let response = round_trip(proxy, b"GET /?mfname=nope HTTP/1.1\r\n\r\n", false).await;
    assert!(response.starts_with(b"default:"));
}

#[tokio::test]
async fn test_non_http_bytes_pass_through_unchanged() {
    let proxy = two_function_proxy().await;
    let payload: &[u8] = b"\x16\x03\x01\x00\x2a\x01\x00\x00\x26\x03\x03binary\x00\xff";

    let response = round_trip(proxy, payload, true).await;

    let mut expected = b"default:".to_vec();
    expected.extend_from_slice(payload);
    assert_eq!(response, expected);
}

#[tokio::test]
async fn test_concurrent_connections_keep_their_own_route() {
    let proxy = two_function_proxy().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        tasks.push(tokio::spawn(async move {
            let function = if i % 2 == 0 { "billing" } else { "other" };
            let request = format!("GET /svc?mfname={}&i={} HTTP/1.1\r\n\r\n", function, i);
            let response = round_trip(proxy, request.as_bytes(), false).await;
            (function, response)
        }));
    }

    for task in tasks {
        let (function, response) = task.await.unwrap();
        let expected_tag: &[u8] = if function == "billing" {
            b"billing:"
        } else {
            b"default:"
        };
        assert!(response.starts_with(expected_tag));
    }
}

#[tokio::test]
async fn test_server_speaks_first_after_sniff_timeout() {
    let greeter = spawn_greeting_backend(b"220 ready\r\n").await;
    let table = RouteTable::new(HashMap::new(), vec![backend_config(greeter, "smtp")]);
    let proxy = spawn_proxy(table, Duration::from_millis(100)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let mut greeting = [0u8; 11];
    client.read_exact(&mut greeting).await.unwrap();

    assert_eq!(&greeting, b"220 ready\r\n");
}

#[tokio::test]
async fn test_no_route_closes_client() {
    let proxy = spawn_proxy(RouteTable::default(), Duration::from_secs(2)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(b"GET /?mfname=billing HTTP/1.1\r\n\r\n").await.unwrap();

    // Either a clean EOF or a reset, but never any data.
    let mut response = Vec::new();
    let _ = client.read_to_end(&mut response).await;
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_dead_backend_is_skipped() {
    // Grab a free port, then close it so nothing listens there.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let live = spawn_echo_backend("live").await;

    let table = RouteTable::new(
        HashMap::new(),
        vec![backend_config(dead, "dead"), backend_config(live, "live")],
    );
    let handler = ProxyHandler::new(
        table,
        SniffSettings::default(),
        Duration::from_secs(1),
        Duration::from_secs(1),
    );

    let (backend, _stream) = handler.connect_backend(None).await.unwrap();
    assert_eq!(backend.display_name(), "live");

    let (backend, _stream) = handler.connect_backend(Some("anything")).await.unwrap();
    assert_eq!(backend.display_name(), "live");
}

#[tokio::test]
async fn test_connect_backend_without_route_fails() {
    let handler = ProxyHandler::new(
        RouteTable::default(),
        SniffSettings::default(),
        Duration::from_secs(1),
        Duration::from_secs(1),
    );

    assert!(handler.connect_backend(Some("billing")).await.is_err());
}
