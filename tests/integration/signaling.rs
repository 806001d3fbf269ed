// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end signaling tests against an in-process relay.
//!
//! Every test starts its own relay on an OS-assigned port and talks to it
//! with real `tokio-tungstenite` clients, so rooms, roles, fan-out, rejection
//! and cleanup are exercised through the same path a browser would take.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use signal_proto::{ServerMessage, StatusReport};
use signal_relay::relay::{self, RelayState};
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

/// Starts a relay and returns its address plus the shared state for
/// inspecting the registry.
async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws?{query}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("websocket connect failed");
    ws
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Receives the next text frame, failing the test on timeout.
async fn recv_text(ws: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Asserts that nothing arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

/// Waits until the registry reports `expected` active connections.
async fn wait_for_active(state: &RelayState, expected: usize) {
    for _ in 0..200 {
        if state.registry.snapshot().active_connections == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} active connections, found {}",
        state.registry.snapshot().active_connections
    );
}

/// Asserts the socket receives the rejection message and is then closed.
async fn assert_rejected(ws: &mut Client) {
    let text = recv_text(ws).await;
    let msg: ServerMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(
        msg,
        ServerMessage::Error {
            message: "room already has a streamer".to_string()
        }
    );

    let next = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("close timed out");
    match next {
        Some(Ok(Message::Close(_)) | Err(_)) | None => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn offer_answer_exchange_and_second_streamer_rejected() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1&type=viewer").await;
    wait_for_active(&state, 2).await;

    let offer = r#"{"type":"offer","sdp":"v=0\r\no=- 46117 2 IN IP4 127.0.0.1"}"#;
    send_text(&mut streamer, offer).await;
    assert_eq!(recv_text(&mut viewer).await, offer);

    let answer = r#"{"type":"answer","sdp":"v=0\r\no=- 9 2 IN IP4 0.0.0.0"}"#;
    send_text(&mut viewer, answer).await;
    assert_eq!(recv_text(&mut streamer).await, answer);

    let mut intruder = connect(addr, "room=room1&type=streamer").await;
    assert_rejected(&mut intruder).await;

    // The first pair is untouched and still exchanges messages.
    assert_eq!(state.registry.snapshot().active_connections, 2);
    let candidate = r#"{"type":"ice-candidate","candidate":"candidate:1 1 UDP 2122 10.0.0.2 5000 typ host"}"#;
    send_text(&mut streamer, candidate).await;
    assert_eq!(recv_text(&mut viewer).await, candidate);
    send_text(&mut viewer, candidate).await;
    assert_eq!(recv_text(&mut streamer).await, candidate);
}

#[tokio::test]
async fn streamer_can_rejoin_after_disconnect() {
    let (addr, state) = start_relay().await;

    let mut first = connect(addr, "room=room1&type=streamer").await;
    wait_for_active(&state, 1).await;
    first.close(None).await.unwrap();
    wait_for_active(&state, 0).await;

    let mut second = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1").await;
    wait_for_active(&state, 2).await;

    send_text(&mut second, r#"{"type":"offer"}"#).await;
    assert_eq!(recv_text(&mut viewer).await, r#"{"type":"offer"}"#);
}

#[tokio::test]
async fn publisher_message_reaches_every_viewer_exactly_once() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(connect(addr, "room=room1&type=viewer").await);
    }
    wait_for_active(&state, 4).await;

    send_text(&mut streamer, r#"{"type":"offer","n":1}"#).await;
    for viewer in &mut viewers {
        assert_eq!(recv_text(viewer).await, r#"{"type":"offer","n":1}"#);
    }
    for viewer in &mut viewers {
        assert_silent(viewer).await;
    }
}

#[tokio::test]
async fn viewer_messages_go_only_to_streamer() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut a = connect(addr, "room=room1&type=viewer").await;
    let mut b = connect(addr, "room=room1&type=viewer").await;
    wait_for_active(&state, 3).await;

    send_text(&mut a, r#"{"type":"answer","from":"a"}"#).await;
    assert_eq!(recv_text(&mut streamer).await, r#"{"type":"answer","from":"a"}"#);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn viewer_without_streamer_is_dropped_silently() {
    let (addr, state) = start_relay().await;

    let mut viewer = connect(addr, "room=empty").await;
    wait_for_active(&state, 1).await;

    send_text(&mut viewer, r#"{"type":"answer"}"#).await;
    assert_silent(&mut viewer).await;
    assert_eq!(state.registry.snapshot().active_connections, 1);
}

#[tokio::test]
async fn malformed_messages_are_dropped_and_connection_survives() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1").await;
    wait_for_active(&state, 2).await;

    send_text(&mut streamer, "this is not json").await;
    send_text(&mut streamer, "[1,2,3]").await;
    send_text(&mut streamer, r#"{"type":"offer"}"#).await;

    assert_eq!(recv_text(&mut viewer).await, r#"{"type":"offer"}"#);
    assert_silent(&mut viewer).await;
    assert_eq!(state.registry.snapshot().active_connections, 2);
}

#[tokio::test]
async fn payload_is_forwarded_byte_for_byte() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1").await;
    wait_for_active(&state, 2).await;

    // Whitespace, key order and unicode escapes must survive untouched.
    let payload = "{ \"sdp\" : \"v=0\",\n  \"type\":\"offer\", \"note\": \"caf\\u00e9 \u{1F4F7}\" }";
    send_text(&mut streamer, payload).await;
    assert_eq!(recv_text(&mut viewer).await, payload);
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1").await;
    wait_for_active(&state, 2).await;

    for n in 0..20 {
        send_text(&mut streamer, &format!(r#"{{"type":"ice-candidate","n":{n}}}"#)).await;
    }
    for n in 0..20 {
        assert_eq!(
            recv_text(&mut viewer).await,
            format!(r#"{{"type":"ice-candidate","n":{n}}}"#)
        );
    }
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, state) = start_relay().await;

    let mut streamer1 = connect(addr, "room=room1&type=streamer").await;
    let mut streamer2 = connect(addr, "room=room2&type=streamer").await;
    let mut viewer1 = connect(addr, "room=room1").await;
    let mut viewer2 = connect(addr, "room=room2").await;
    wait_for_active(&state, 4).await;

    send_text(&mut streamer1, r#"{"type":"offer","room":1}"#).await;
    assert_eq!(recv_text(&mut viewer1).await, r#"{"type":"offer","room":1}"#);
    assert_silent(&mut viewer2).await;

    send_text(&mut viewer2, r#"{"type":"answer","room":2}"#).await;
    assert_eq!(recv_text(&mut streamer2).await, r#"{"type":"answer","room":2}"#);
    assert_silent(&mut streamer1).await;
}

#[tokio::test]
async fn disconnected_viewer_is_removed_and_others_keep_receiving() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let leaving = connect(addr, "room=room1").await;
    let mut staying = connect(addr, "room=room1").await;
    wait_for_active(&state, 3).await;

    drop(leaving);
    wait_for_active(&state, 2).await;

    send_text(&mut streamer, r#"{"type":"offer"}"#).await;
    assert_eq!(recv_text(&mut staying).await, r#"{"type":"offer"}"#);
}

#[tokio::test]
async fn residual_membership_after_mixed_disconnects() {
    let (addr, state) = start_relay().await;

    let streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewers = Vec::new();
    for _ in 0..6 {
        viewers.push(connect(addr, "room=room1").await);
    }
    wait_for_active(&state, 7).await;

    // Close every other viewer, some gracefully and some by dropping.
    let mut kept = Vec::new();
    for (i, mut viewer) in viewers.into_iter().enumerate() {
        match i % 3 {
            0 => viewer.close(None).await.unwrap(),
            1 => drop(viewer),
            _ => kept.push(viewer),
        }
    }
    wait_for_active(&state, 3).await;

    drop(streamer);
    wait_for_active(&state, 2).await;

    let (publisher, subscribers) = state
        .registry
        .with_group("room1", |g| (g.publisher_id(), g.subscriber_count()))
        .unwrap();
    assert!(publisher.is_none());
    assert_eq!(subscribers, 2);
    assert_eq!(kept.len(), 2);
}

#[tokio::test]
async fn rejected_streamer_is_not_counted() {
    let (addr, state) = start_relay().await;

    let _streamer = connect(addr, "room=room1&type=streamer").await;
    wait_for_active(&state, 1).await;

    for _ in 0..3 {
        let mut extra = connect(addr, "room=room1&type=streamer").await;
        assert_rejected(&mut extra).await;
    }
    assert_eq!(state.status(), StatusReport::ok(1, 1));
}

#[tokio::test]
async fn client_close_gets_close_reply() {
    let (addr, state) = start_relay().await;

    let mut streamer = connect(addr, "room=room1&type=streamer").await;
    let mut viewer = connect(addr, "room=room1&type=viewer").await;
    wait_for_active(&state, 2).await;

    for ws in [&mut streamer, &mut viewer] {
        ws.send(Message::Close(None)).await.unwrap();
        let reply = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("close reply timed out");
        match reply {
            Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close reply, got {other:?}"),
        }
    }
    wait_for_active(&state, 0).await;
}
