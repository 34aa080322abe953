//! End-to-end tests over a real socket.
//!
//! A server is bound to an ephemeral port and driven with
//! `tokio-tungstenite` clients, the way a browser would.

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use hushline_core::SessionConfig;
use hushline_server::{DriverConfig, Server, ServerError, ServerRuntimeConfig};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

const CODE: &str = "Abc123456789!@#$";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(session: SessionConfig) -> Self {
        let config = ServerRuntimeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            driver: DriverConfig { session, ..DriverConfig::default() },
            tick_interval: Duration::from_millis(20),
            ..ServerRuntimeConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self { addr, shutdown: Some(tx), handle }
    }

    async fn connect(&self, path: &str) -> Client {
        let url = format!("ws://{}{}", self.addr, path);
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        Client { ws }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

struct Client {
    ws: WsStream,
}

impl Client {
    async fn send(&mut self, value: &Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    async fn recv_raw(&mut self) -> String {
        let next = tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => panic!("websocket error: {e}"),
                    None => panic!("websocket closed"),
                }
            }
        })
        .await;
        next.expect("timed out waiting for a frame")
    }

    async fn recv(&mut self) -> Value {
        serde_json::from_str(&self.recv_raw().await).unwrap()
    }

    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(window, self.ws.next()).await
        {
            panic!("unexpected frame: {text}");
        }
    }
}

fn short_sessions() -> SessionConfig {
    SessionConfig {
        session_duration: Duration::from_millis(600),
        warning_lead: Duration::from_millis(300),
        max_extensions: 3,
    }
}

#[tokio::test]
async fn health_route_reports_ok() {
    let server = TestServer::start(SessionConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with(r#"{"status":"ok"}"#), "{response}");

    server.stop().await;
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let server = TestServer::start(SessionConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    server.stop().await;
}

#[tokio::test]
async fn ping_over_websocket() {
    let server = TestServer::start(SessionConfig::default()).await;
    let mut client = server.connect("/").await;

    client.send(&json!({"type": "ping"})).await;
    assert_eq!(client.recv().await, json!({"type": "pong", "alive": true}));

    client.send(&json!({"type": "join", "code": "1111111111111111"})).await;
    assert_eq!(client.recv().await, json!({"type": "pong", "alive": true}));

    server.stop().await;
}

#[tokio::test]
async fn direct_pair_relays_signals_verbatim() {
    let server = TestServer::start(SessionConfig::default()).await;
    let mut alice = server.connect("/").await;
    let mut bob = server.connect("/ws").await;

    alice.send(&json!({"type": "join", "code": CODE})).await;
    assert_eq!(alice.recv().await, json!({"type": "joined", "code": CODE, "mode": "direct"}));

    bob.send(&json!({"type": "join", "code": CODE})).await;
    assert_eq!(bob.recv().await, json!({"type": "joined", "code": CODE, "mode": "direct"}));

    let ready = json!({"type": "session_ready", "code": CODE});
    assert_eq!(alice.recv().await, ready);
    assert_eq!(bob.recv().await, ready);

    let offer = r#"{"type":"signal","code":"Abc123456789!@#$","data":{"sdp":"v=0"}}"#;
    alice.send_raw(offer).await;
    assert_eq!(bob.recv_raw().await, offer);

    let mut carol = server.connect("/").await;
    carol.send(&json!({"type": "join", "code": CODE})).await;
    let rejected = carol.recv().await;
    assert_eq!(rejected["reason"], "room_full");
    assert_eq!(rejected["code"], CODE);

    alice.expect_silence(Duration::from_millis(100)).await;

    server.stop().await;
}

#[tokio::test]
async fn disconnect_leaves_session_without_notice() {
    let server = TestServer::start(SessionConfig::default()).await;
    let mut alice = server.connect("/").await;
    let mut bob = server.connect("/").await;

    alice.send(&json!({"type": "join", "code": CODE, "mode": "group"})).await;
    alice.recv().await;
    bob.send(&json!({"type": "join", "code": CODE, "mode": "group"})).await;
    bob.recv().await;

    drop(bob);
    alice.expect_silence(Duration::from_millis(200)).await;

    let mut carol = server.connect("/").await;
    carol.send(&json!({"type": "join", "code": CODE, "mode": "group"})).await;
    carol.recv().await;

    carol.send(&json!({"type": "msg", "code": CODE, "ciphertext": "AAAA"})).await;
    assert_eq!(alice.recv().await["ciphertext"], "AAAA");

    server.stop().await;
}

#[tokio::test]
async fn session_expires_after_warning() {
    let server = TestServer::start(short_sessions()).await;
    let mut alice = server.connect("/").await;

    alice.send(&json!({"type": "join", "code": CODE})).await;
    alice.recv().await;

    assert_eq!(
        alice.recv().await,
        json!({"type": "extend_request", "code": CODE, "remainingExtensions": 3})
    );
    assert_eq!(alice.recv().await, json!({"type": "expired", "code": CODE}));

    alice.send(&json!({"type": "extend_response", "code": CODE, "accept": true})).await;
    assert_eq!(alice.recv().await["reason"], "no_room");

    server.stop().await;
}

#[tokio::test]
async fn accepted_extension_is_broadcast_and_resets_timers() {
    let server = TestServer::start(short_sessions()).await;
    let mut alice = server.connect("/").await;

    alice.send(&json!({"type": "join", "code": CODE})).await;
    alice.recv().await;
    assert_eq!(alice.recv().await["type"], "extend_request");

    alice.send(&json!({"type": "extend_response", "code": CODE, "accept": true})).await;
    assert_eq!(alice.recv().await, json!({"type": "extended", "code": CODE, "renewCount": 1}));

    assert_eq!(
        alice.recv().await,
        json!({"type": "extend_request", "code": CODE, "remainingExtensions": 2})
    );

    server.stop().await;
}

#[tokio::test]
async fn oversized_session_duration_is_rejected_at_bind() {
    let session = SessionConfig {
        session_duration: Duration::from_secs(u64::MAX),
        ..SessionConfig::default()
    };
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        driver: DriverConfig { session, ..DriverConfig::default() },
        ..ServerRuntimeConfig::default()
    };

    let result = Server::bind(config).await;

    assert!(matches!(result, Err(ServerError::Config(_))));
}
