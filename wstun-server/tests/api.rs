//! HTTP surface and end-to-end tunnelling against a mock interface

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use wstun_core::transport::mock::{IpPacketBuilder, MockTunDevice};
use wstun_core::{Allocator, ByteCounters, Codec, MemoryStore, PeerRegistry, Relay};
use wstun_server::{
    ApiError, AppState, Config, Error, RegisterResponse, Server, ServerConfig, TunnelSettings,
};

const WAIT: Duration = Duration::from_secs(5);

/// Longer than the server's HTTP drain timeout
const STOP_WAIT: Duration = Duration::from_secs(15);

fn server_config(key: &str, cidr: &str) -> ServerConfig {
    ServerConfig {
        key: key.to_string(),
        cidr: cidr.to_string(),
        ..ServerConfig::default()
    }
}

/// Router over a fresh in-memory allocator, plus the allocator for inspection
fn app(config: &ServerConfig) -> (Router, Arc<Allocator>, Relay) {
    let allocator = Arc::new(
        Allocator::new(config.block().unwrap(), MemoryStore::new()).unwrap(),
    );
    let relay = Relay::new(
        Arc::new(MockTunDevice::new("wstun", config.mtu)),
        Arc::new(PeerRegistry::new()),
        Arc::new(ByteCounters::new()),
    );
    let (state, _fatal) = AppState::new(config, allocator.clone(), relay.clone());
    (Server::router(state), allocator, relay)
}

fn register_request(key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/allocator/register")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("key", key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_timestamp_is_public() {
    let (app, _, _) = app(&server_config("secret", "10.0.10.1/24"));

    let response = app.oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = json(response).await;
    assert!(body["timestamp"].as_u64().unwrap() > 1_600_000_000);
}

#[tokio::test]
async fn test_wrong_key_is_rejected_without_side_effects() {
    let (app, allocator, _) = app(&server_config("secret", "10.0.10.1/24"));

    for key in [None, Some("wrong"), Some("SECRET")] {
        let response = app
            .clone()
            .oneshot(register_request(key, r#"{"id":"device-a"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: ApiError = json(response).await;
        assert_eq!(body, ApiError::new("not permitted"));
    }

    for uri in ["/config", "/stats", "/ws"] {
        let response = app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", uri);
    }

    assert_eq!(allocator.lease_count().unwrap(), 0);
}

#[tokio::test]
async fn test_no_key_configured_accepts_everything() {
    let (app, _, _) = app(&server_config("", "10.0.10.1/24"));

    let response = app
        .oneshot(register_request(None, r#"{"id":"device-a"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_in_smallest_network() {
    // /30 leaves exactly one client address after the server's
    let (app, allocator, _) = app(&server_config("secret", "10.0.0.0/30"));

    let response = app
        .clone()
        .oneshot(register_request(Some("secret"), r#"{"id":"device-a"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first: RegisterResponse = json(response).await;
    assert_eq!(
        first,
        RegisterResponse {
            server: "10.0.0.1".into(),
            client: "10.0.0.2/30".into(),
        }
    );

    let response = app
        .clone()
        .oneshot(register_request(Some("secret"), r#"{"id":"device-b"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiError = json(response).await;
    assert!(!body.message.is_empty());

    // Known devices keep their lease even when the pool is full
    let response = app
        .oneshot(register_request(Some("secret"), r#"{"id":"device-a"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let again: RegisterResponse = json(response).await;
    assert_eq!(again, first);

    assert_eq!(allocator.lease_count().unwrap(), 1);
}

#[tokio::test]
async fn test_register_rejects_bad_bodies() {
    let (app, allocator, _) = app(&server_config("secret", "10.0.10.1/24"));

    for body in ["", "not json", r#"{"name":"x"}"#, r#"{"id":""}"#] {
        let response = app
            .clone()
            .oneshot(register_request(Some("secret"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{:?}", body);
        let error: ApiError = json(response).await;
        assert!(!error.message.is_empty());
    }

    assert_eq!(allocator.lease_count().unwrap(), 0);
}

#[tokio::test]
async fn test_config_echoes_tunnel_settings() {
    let mut config = server_config("secret", "10.0.10.1/24");
    config.mtu = 1400;
    config.buffer_size = 4096;
    config.compress = true;
    let (app, _, _) = app(&config);

    let response = app.oneshot(get("/config", Some("secret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let settings: TunnelSettings = json(response).await;
    assert_eq!(
        settings,
        TunnelSettings {
            buffer_size: 4096,
            mtu: 1400,
            compress: true,
        }
    );
}

#[tokio::test]
async fn test_stats_renders_counters() {
    let (app, _, relay) = app(&server_config("secret", "10.0.10.1/24"));
    relay.counters().add_read(2048);
    relay.counters().add_written(10);

    let response = app.oneshot(get("/stats", Some("secret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(text, "download 10B upload 2.00KB");
}

// End-to-end over a real socket

struct Running {
    addr: SocketAddr,
    tun: Arc<MockTunDevice>,
    shutdown: tokio::sync::broadcast::Sender<()>,
    task: tokio::task::JoinHandle<wstun_server::Result<()>>,
}

async fn start(compress: bool) -> Running {
    let mut config = Config::default();
    config.server = server_config("secret", "10.0.10.1/24");
    config.server.compress = compress;

    let server = Server::new(config).unwrap();
    let shutdown = server.shutdown_handle();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tun = Arc::new(MockTunDevice::new("wstun", 1500));

    let tun_dyn = tun.clone();
    let task = tokio::spawn(async move {
        server
            .serve(listener, tun_dyn, MemoryStore::new())
            .await
    });

    Running {
        addr,
        tun,
        shutdown,
        task,
    }
}

async fn connect(
    addr: SocketAddr,
    key: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Error,
> {
    let mut request = format!("ws://{}/ws", addr).into_client_request()?;
    request.headers_mut().insert("key", key.parse().unwrap());
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

#[tokio::test]
async fn test_websocket_requires_key() {
    let running = start(false).await;
    assert!(connect(running.addr, "wrong").await.is_err());
    running.shutdown.send(()).unwrap();
    assert!(timeout(STOP_WAIT, running.task).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_websocket_tunnel_round_trip() {
    let running = start(true).await;
    let codec = Codec::new(true);
    let mut ws = connect(running.addr, "secret").await.unwrap();

    // Control frames come straight back
    ws.send(Message::Text("ping".into())).await.unwrap();
    let echoed = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed, Message::Text("ping".into()));

    // Uplink: the packet lands on the interface and binds 10.0.10.2
    let uplink = IpPacketBuilder::ipv4()
        .src_v4(10, 0, 10, 2)
        .dst_v4(10, 0, 10, 1)
        .payload(b"uplink".to_vec())
        .build();
    ws.send(Message::Binary(codec.encode(&uplink).unwrap()))
        .await
        .unwrap();
    let sent = timeout(WAIT, running.tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(sent[0], uplink);

    // Downlink: traffic for 10.0.10.2 reaches this connection
    let downlink = IpPacketBuilder::ipv4()
        .src_v4(10, 0, 10, 1)
        .dst_v4(10, 0, 10, 2)
        .payload(b"downlink".to_vec())
        .build();
    running.tun.inject(downlink.clone());
    let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Binary(data) = frame else {
        panic!("expected a binary frame, got {:?}", frame);
    };
    assert_eq!(codec.decode(data).unwrap(), downlink);

    ws.close(None).await.unwrap();
    running.shutdown.send(()).unwrap();
    assert!(timeout(STOP_WAIT, running.task).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_interface_failure_stops_server() {
    let running = start(false).await;
    running.tun.close();

    let result = timeout(WAIT, running.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Fatal(_))));
}

#[tokio::test]
async fn test_interface_write_failure_stops_server() {
    let running = start(false).await;
    running.tun.set_fail_writes(true);

    let mut ws = connect(running.addr, "secret").await.unwrap();
    let packet = IpPacketBuilder::ipv4().src_v4(10, 0, 10, 2).build();
    ws.send(Message::Binary(packet)).await.unwrap();

    let result = timeout(WAIT, running.task).await.unwrap().unwrap();
    match result {
        Err(e) => assert!(e.is_fatal()),
        Ok(()) => panic!("server kept running after an interface write failure"),
    }
}
