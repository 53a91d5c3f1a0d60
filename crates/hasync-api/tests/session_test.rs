#![allow(clippy::unwrap_used)]
// Integration tests for `SessionHandle` against a scripted local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use hasync_api::{
    Error, ReconnectConfig, Request, SessionConfig, SessionEvent, SessionHandle, SessionStatus,
};

type ServerSocket = WebSocketStream<TcpStream>;

// ── Helpers ─────────────────────────────────────────────────────────

async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut ServerSocket) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("client closed the socket"),
            _ => {}
        }
    }
}

/// Run the auth handshake from the server side, accepting `token`.
async fn handshake(ws: &mut ServerSocket, token: &str) {
    send_json(ws, json!({ "type": "auth_required", "ha_version": "2025.1.0" })).await;
    let auth = recv_json(ws).await;
    assert_eq!(auth, json!({ "type": "auth", "access_token": token }));
    send_json(ws, json!({ "type": "auth_ok", "ha_version": "2025.1.0" })).await;
}

fn config(url: Url) -> SessionConfig {
    let mut config = SessionConfig::new(url, "test-token".to_string().into());
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        max_retries: Some(5),
    };
    config
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_authenticated(events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    loop {
        if let SessionEvent::Authenticated { .. } = next_event(events).await {
            return;
        }
    }
}

// ── Handshake and requests ──────────────────────────────────────────

#[tokio::test]
async fn test_handshake_then_request_result() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;

        let req = recv_json(&mut ws).await;
        assert_eq!(req["type"], "get_states");
        send_json(
            &mut ws,
            json!({
                "id": req["id"],
                "type": "result",
                "success": true,
                "result": [{ "entity_id": "light.kitchen", "state": "on" }]
            }),
        )
        .await;
        // Hold the socket until the client hangs up.
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Opened);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Authenticated {
            ha_version: Some("2025.1.0".into())
        }
    );
    assert_eq!(session.status(), SessionStatus::Connected);

    let states = session.send(Request::get_states()).unwrap().wait().await.unwrap();
    assert_eq!(states[0]["entity_id"], "light.kitchen");
    assert_eq!(session.pending_count(), 0);

    session.shutdown();
    loop {
        if next_event(&mut events).await == SessionEvent::Stopped {
            break;
        }
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_failed_result_maps_to_command_error() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;
        let req = recv_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({
                "id": req["id"],
                "type": "result",
                "success": false,
                "error": { "code": "unknown_command", "message": "Unknown command." }
            }),
        )
        .await;
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();
    wait_authenticated(&mut events).await;

    let result = session.send(Request::new("bogus")).unwrap().wait().await;
    assert!(
        matches!(&result, Err(Error::Command { code, .. }) if code == "unknown_command"),
        "expected Command error, got: {result:?}"
    );
    session.shutdown();
}

#[tokio::test]
async fn test_send_before_auth_is_refused() {
    let (listener, url) = listen().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // Never send auth_required.
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Opened);

    let result = session.send(Request::get_states());
    assert!(matches!(result, Err(Error::NotConnected)));
    assert_eq!(session.pending_count(), 0);
    session.shutdown();
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_subscription_receives_events_until_unsubscribed() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;

        let sub = recv_json(&mut ws).await;
        assert_eq!(sub["type"], "subscribe_trigger");
        let id = sub["id"].clone();
        send_json(&mut ws, json!({ "id": id, "type": "result", "success": true, "result": null }))
            .await;
        for n in 0..2 {
            send_json(
                &mut ws,
                json!({ "id": id, "type": "event", "event": { "n": n } }),
            )
            .await;
        }

        let unsub = recv_json(&mut ws).await;
        assert_eq!(unsub["type"], "unsubscribe_events");
        assert_eq!(unsub["subscription"], id);
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();
    wait_authenticated(&mut events).await;

    let mut sub = session
        .subscribe(Request::subscribe_state_trigger("light.kitchen"))
        .unwrap();
    sub.confirmed().await.unwrap();
    assert_eq!(sub.next_event().await.unwrap(), json!({ "n": 0 }));
    assert_eq!(sub.next_event().await.unwrap(), json!({ "n": 1 }));

    session.unsubscribe(sub.id());
    // The local entry goes away immediately; the stream ends.
    assert!(sub.next_event().await.is_none());

    session.shutdown();
    server.await.unwrap();
}

// ── Auth rejection and reconnect ────────────────────────────────────

#[tokio::test]
async fn test_auth_invalid_stops_without_retry() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, json!({ "type": "auth_required" })).await;
        let _auth = recv_json(&mut ws).await;
        send_json(
            &mut ws,
            json!({ "type": "auth_invalid", "message": "Invalid access token" }),
        )
        .await;
        let _ = ws.close(None).await;

        // A retry would land here.
        let retry = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(retry.is_err(), "client reconnected after auth_invalid");
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Opened);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::AuthRejected {
            message: "Invalid access token".into()
        }
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::Stopped);
    assert!(!session.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_abnormal_close_reports_code_and_reason() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();
    wait_authenticated(&mut events).await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error("WebSocket closed (code 1008): maintenance".into())
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);

    session.shutdown();
    server.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_fails_inflight_and_restarts_ids() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        // First socket: authenticate, swallow one request, drop.
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;
        let first = recv_json(&mut ws).await;
        drop(ws);

        // Second socket: ids start over.
        let mut ws = accept(&listener).await;
        handshake(&mut ws, "test-token").await;
        let second = recv_json(&mut ws).await;
        assert_eq!(first["id"], second["id"]);
        send_json(
            &mut ws,
            json!({ "id": second["id"], "type": "result", "success": true, "result": "ok" }),
        )
        .await;
        while ws.next().await.is_some() {}
    });

    let (session, mut events) =
        SessionHandle::connect(config(url), CancellationToken::new()).unwrap();
    wait_authenticated(&mut events).await;

    let lost = session.send(Request::get_config()).unwrap();
    assert!(matches!(lost.wait().await, Err(Error::SessionClosed)));

    wait_authenticated(&mut events).await;
    let value = session.send(Request::get_config()).unwrap().wait().await.unwrap();
    assert_eq!(value, json!("ok"));

    session.shutdown();
    server.await.unwrap();
}
