#![cfg(feature = "ws-api")]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{build_runtime, build_runtime_with, uppercase_endpoint};
use futures_util::{SinkExt, StreamExt};
use socket_runtime::{EndpointBuilder, Message, Reply, Runtime, RuntimeConfig, ws_api};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(runtime: Arc<Runtime>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, ws_api::router(runtime))
            .await
            .expect("server should run");
    });
    addr
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _response) = connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("client should connect");
    client
}

async fn next_frame(client: &mut Client) -> WsMessage {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("frame should arrive in time")
        .expect("stream should stay open")
        .expect("frame should be valid")
}

async fn wait_for_connections(runtime: &Runtime, expected: usize) {
    for _ in 0..100 {
        if runtime.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} open connections");
}

#[tokio::test]
async fn test_two_clients_receive_broadcast() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let addr = spawn_server(Arc::clone(&runtime)).await;

    let mut c1 = connect(addr, "/up/1").await;
    let mut c2 = connect(addr, "/up/2").await;
    wait_for_connections(&runtime, 2).await;

    c1.send(WsMessage::Text("hello".into()))
        .await
        .expect("send should succeed");

    for client in [&mut c1, &mut c2] {
        let frame = next_frame(client).await;
        assert_eq!(frame.to_text().expect("text frame"), "1:HELLO");
    }
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected_before_upgrade() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let addr = spawn_server(runtime).await;

    let err = connect_async(format!("ws://{addr}/nowhere"))
        .await
        .expect_err("unknown endpoint should not upgrade");

    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected HTTP 404, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_handler_failure_sends_internal_error_close() {
    let runtime = build_runtime(vec![EndpointBuilder::new("/strict").on_message(
        false,
        |_ctx, _msg| async move { Err::<Reply, _>(anyhow::anyhow!("nope")) },
    )]);
    let addr = spawn_server(Arc::clone(&runtime)).await;
    let mut client = connect(addr, "/strict").await;
    wait_for_connections(&runtime, 1).await;

    client
        .send(WsMessage::Text("anything".into()))
        .await
        .expect("send should succeed");

    match next_frame(&mut client).await {
        WsMessage::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1011),
        other => panic!("expected close frame, got: {other:?}"),
    }
    wait_for_connections(&runtime, 0).await;
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let addr = spawn_server(Arc::clone(&runtime)).await;
    let mut client = connect(addr, "/up/1").await;
    wait_for_connections(&runtime, 1).await;

    client.close(None).await.expect("close should succeed");

    wait_for_connections(&runtime, 0).await;
}

async fn get_health(addr: SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write request");
    let mut raw = String::new();
    stream
        .read_to_string(&mut raw)
        .await
        .expect("read response");
    raw
}

#[tokio::test]
async fn test_health_reports_open_connections() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let addr = spawn_server(Arc::clone(&runtime)).await;
    let _client = connect(addr, "/up/1").await;
    wait_for_connections(&runtime, 1).await;

    let raw = get_health(addr).await;

    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains(r#""open_connections":1"#));
}

#[tokio::test]
async fn test_health_reports_dropped_messages_and_forced_closes() {
    let config = RuntimeConfig::from_str(
        r#"
send_queue_capacity = 1

[backpressure]
policy = "drop"
max_drops = 2
"#,
    )
    .expect("config should parse");
    let runtime = build_runtime_with(config, vec![uppercase_endpoint()]);
    let addr = spawn_server(Arc::clone(&runtime)).await;

    let fast = runtime.accept("/up/fast").await.expect("accept fast");
    let slow = runtime.accept("/up/slow").await.expect("accept slow");
    let mut fast_rx = fast.take_outbound().expect("fast rx");
    let _slow_rx = slow.take_outbound().expect("slow rx");

    for text in ["a", "b", "c"] {
        runtime
            .on_frame(&fast, Message::text(text))
            .expect("frame accepted")
            .outcome()
            .await;
        let _ = fast_rx.recv().await;
    }
    assert!(!slow.is_open());

    let raw = get_health(addr).await;

    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.contains(r#""dropped":2"#));
    assert!(raw.contains(r#""forced_closes":1"#));
}
