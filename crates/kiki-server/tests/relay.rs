//! End-to-end tests using real WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use kiki_server::{RelayServer, ServerConfig};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a server on an ephemeral port.
async fn boot_with(config: ServerConfig) -> (SocketAddr, RelayServer) {
    let server = RelayServer::new(ServerConfig { port: 0, ..config });
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

async fn boot() -> (SocketAddr, RelayServer) {
    boot_with(ServerConfig::default()).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// HTTP status of a refused handshake.
async fn refused(url: &str) -> u16 {
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake unexpectedly succeeded"),
    }
}

async fn direct(addr: SocketAddr, server: &RelayServer, id: &str) -> WsStream {
    let ws = connect(&format!("ws://{addr}/kiki?id={id}")).await;
    wait_until(|| server.registry().contains(id)).await;
    ws
}

async fn room(addr: SocketAddr, command: &str, room_id: &str, client_id: &str) -> WsStream {
    connect(&format!(
        "ws://{addr}/rooms?command={command}&room_id={room_id}&client_id={client_id}"
    ))
    .await
}

/// Read the next text message verbatim.
async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    serde_json::from_str(&read_text(ws).await).unwrap()
}

/// Assert no text message arrives within [`QUIET`].
async fn assert_silent(ws: &mut WsStream) {
    let _ = timeout(QUIET, async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                panic!("unexpected message: {text}");
            }
        }
    })
    .await;
}

/// Wait until the server side ends the stream.
async fn assert_closed(ws: &mut WsStream) {
    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection was not closed");
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn send(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

// ── Direct relay ──

#[tokio::test]
async fn direct_message_reaches_each_recipient_once() {
    let (addr, server) = boot().await;
    let mut a = direct(addr, &server, "a").await;
    let mut b = direct(addr, &server, "b").await;
    let mut c = direct(addr, &server, "c").await;

    let envelope = json!({"from": "a", "to": ["b", "b", "ghost"], "body": "hi"});
    send(&mut a, &envelope).await;

    assert_eq!(read_json(&mut b).await, envelope);
    assert_silent(&mut b).await;
    assert_silent(&mut c).await;
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn malformed_message_keeps_connection_open() {
    let (addr, server) = boot().await;
    let mut a = direct(addr, &server, "a").await;
    let mut b = direct(addr, &server, "b").await;

    a.send(Message::text("not json")).await.unwrap();
    send(&mut a, &json!({"from": "a", "to": "b", "body": "scalar to"})).await;
    let good = json!({"from": "a", "to": ["b"], "body": "after"});
    send(&mut a, &good).await;

    assert_eq!(read_json(&mut b).await, good);
}

#[tokio::test]
async fn direct_frame_is_forwarded_verbatim() {
    let (addr, server) = boot().await;
    let mut a = direct(addr, &server, "a").await;
    let mut b = direct(addr, &server, "b").await;

    let frame = r#"{"body":"hi", "to":["b"], "from":"a", "meta":{"trace":"t-9"}}"#;
    a.send(Message::text(frame)).await.unwrap();
    assert_eq!(read_text(&mut b).await, frame);
}

#[tokio::test]
async fn missing_id_is_refused() {
    let (addr, _server) = boot().await;
    assert_eq!(refused(&format!("ws://{addr}/kiki")).await, 400);
}

#[tokio::test]
async fn duplicate_identity_replaces_prior_connection() {
    let (addr, server) = boot().await;
    let mut first = direct(addr, &server, "a").await;
    let mut second = connect(&format!("ws://{addr}/kiki?id=a")).await;

    assert_closed(&mut first).await;
    // The displaced session's cleanup must not evict its replacement.
    tokio::time::sleep(QUIET).await;
    assert!(server.registry().contains("a"));

    let mut b = direct(addr, &server, "b").await;
    send(&mut b, &json!({"from": "b", "to": ["a"], "body": "x"})).await;
    assert_eq!(read_json(&mut second).await["body"], "x");
}

#[tokio::test]
async fn disconnect_unregisters_client() {
    let (addr, server) = boot().await;
    let mut a = direct(addr, &server, "a").await;
    a.close(None).await.unwrap();
    wait_until(|| server.registry().is_empty()).await;
}

// ── Room relay ──

#[tokio::test]
async fn room_lifecycle_notifications() {
    let (addr, server) = boot().await;

    let mut c1 = room(addr, "create", "r1", "c1").await;
    assert_eq!(
        read_json(&mut c1).await,
        json!({"action": "join", "client_id": "c1", "body": "joined"})
    );

    let mut c2 = room(addr, "join", "r1", "c2").await;
    let joined = json!({"action": "join", "client_id": "c2", "body": "joined"});
    assert_eq!(read_json(&mut c1).await, joined);
    assert_eq!(read_json(&mut c2).await, joined);

    c2.send(Message::text("hello there")).await.unwrap();
    let event = json!({"action": "event", "client_id": "c2", "body": "hello there"});
    assert_eq!(read_json(&mut c1).await, event);
    assert_eq!(read_json(&mut c2).await, event);

    c1.close(None).await.unwrap();
    assert_eq!(
        read_json(&mut c2).await,
        json!({"action": "exit", "client_id": "c1", "body": "left"})
    );

    c2.close(None).await.unwrap();
    wait_until(|| !server.rooms().has_room("r1")).await;
    assert_eq!(
        refused(&format!("ws://{addr}/rooms?command=join&room_id=r1&client_id=c3")).await,
        404
    );
}

#[tokio::test]
async fn room_admission_failures() {
    let (addr, server) = boot().await;
    let mut c1 = room(addr, "create", "r1", "c1").await;
    let _ = read_json(&mut c1).await;

    let base = format!("ws://{addr}/rooms");
    assert_eq!(refused(&format!("{base}?command=join&room_id=nope&client_id=c2")).await, 404);
    assert_eq!(refused(&format!("{base}?command=create&room_id=r1&client_id=c2")).await, 409);
    assert_eq!(refused(&format!("{base}?command=join&room_id=r1")).await, 400);
    assert_eq!(refused(&format!("{base}?command=leave&room_id=r1&client_id=c2")).await, 400);

    assert_eq!(server.rooms().members("r1").unwrap().len(), 1);
    assert_silent(&mut c1).await;
}

#[tokio::test]
async fn abrupt_disconnect_announces_exit() {
    let (addr, server) = boot().await;
    let mut c1 = room(addr, "create", "r1", "c1").await;
    let _ = read_json(&mut c1).await;
    let mut c2 = room(addr, "join", "r1", "c2").await;
    let _ = read_json(&mut c1).await;
    let _ = read_json(&mut c2).await;

    // Tear down the TCP connection without a Close frame.
    drop(c2);
    c1.send(Message::text("anyone?")).await.unwrap();

    let exit = json!({"action": "exit", "client_id": "c2", "body": "left"});
    loop {
        let msg = read_json(&mut c1).await;
        if msg == exit {
            break;
        }
        assert_eq!(msg["action"], "event");
    }
    // Announced once, whichever side noticed the drop first.
    assert_silent(&mut c1).await;
    assert_eq!(
        server.rooms().members("r1").unwrap(),
        vec![kiki_core::ClientId::from("c1")]
    );
}

#[tokio::test]
async fn rejoin_replaces_prior_room_connection() {
    let (addr, server) = boot().await;
    let mut c1 = room(addr, "create", "r1", "c1").await;
    let _ = read_json(&mut c1).await;
    let mut stale = room(addr, "join", "r1", "c2").await;
    let _ = read_json(&mut c1).await;
    let _ = read_json(&mut stale).await;

    let mut fresh = room(addr, "join", "r1", "c2").await;
    assert_closed(&mut stale).await;

    let joined = json!({"action": "join", "client_id": "c2", "body": "joined"});
    assert_eq!(read_json(&mut c1).await, joined);
    assert_eq!(read_json(&mut fresh).await, joined);
    // The evicted connection leaves without an exit notice.
    assert_silent(&mut c1).await;
    assert_eq!(server.rooms().members("r1").unwrap().len(), 2);

    c1.send(Message::text("welcome back")).await.unwrap();
    assert_eq!(read_json(&mut fresh).await["body"], "welcome back");
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _server) = boot().await;
    let mut a = room(addr, "create", "r1", "a").await;
    let mut b = room(addr, "create", "r2", "b").await;
    let _ = read_json(&mut a).await;
    let _ = read_json(&mut b).await;

    a.send(Message::text("only r1")).await.unwrap();
    assert_eq!(read_json(&mut a).await["body"], "only r1");
    assert_silent(&mut b).await;
}

// ── Server ──

#[tokio::test]
async fn connection_limit_is_enforced() {
    let (addr, server) = boot_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let mut a = direct(addr, &server, "a").await;
    assert_eq!(refused(&format!("ws://{addr}/kiki?id=b")).await, 503);

    a.close(None).await.unwrap();
    wait_until(|| server.state().connection_count() == 0).await;
    let _b = direct(addr, &server, "b").await;
}

#[tokio::test]
async fn shutdown_closes_sessions_and_cleans_up() {
    let (addr, server) = boot().await;
    let mut a = direct(addr, &server, "a").await;
    let mut r = room(addr, "create", "r1", "c1").await;
    let _ = read_json(&mut r).await;

    server.shutdown().shutdown();
    assert_closed(&mut a).await;
    assert_closed(&mut r).await;
    wait_until(|| server.registry().is_empty() && server.rooms().room_count() == 0).await;
}
