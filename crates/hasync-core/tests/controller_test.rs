#![allow(clippy::unwrap_used)]
// Integration tests for `Controller` against a local fake Home Assistant.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use hasync_api::ReconnectConfig;
use hasync_core::{
    ConnectionState, Controller, CoreError, MemoryStore, SnapshotCache, SyncConfig, SyncContext,
    SyncPhase,
};

const TOKEN: &str = "test-token";
const WAIT: Duration = Duration::from_secs(5);

// ── Fake server ─────────────────────────────────────────────────────

/// One accepted socket: frames the client sent, and a way to push more.
/// Pushing `null` closes the socket from the server side.
struct Conn {
    requests: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<Value>,
}

impl Conn {
    /// Next request of `kind`, skipping others.
    async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let req = tokio::time::timeout(WAIT, self.requests.recv())
                .await
                .expect("timed out waiting for request")
                .expect("connection closed");
            if req["type"] == kind {
                return req;
            }
        }
    }
}

fn reply_for(req: &Value) -> Value {
    let id = req["id"].clone();
    let result = match req["type"].as_str().unwrap_or_default() {
        "get_states" => json!([
            { "entity_id": "light.kitchen", "state": "on",
              "attributes": { "friendly_name": "Kitchen Light" } },
            { "entity_id": "sensor.hall_temp", "state": "21" }
        ]),
        "config/area_registry/list" => json!([
            { "area_id": "kitchen", "name": "Kitchen", "floor_id": "ground" },
            { "area_id": "hall", "name": "Hall" }
        ]),
        "config/floor_registry/list" => json!([{ "floor_id": "ground", "name": "Ground", "level": 0 }]),
        "config/device_registry/list" => json!([{ "id": "d1", "name": "Thermo", "area_id": "hall" }]),
        "config/entity_registry/list" => json!([
            { "entity_id": "light.kitchen", "area_id": "kitchen" },
            { "entity_id": "sensor.hall_temp", "device_id": "d1" }
        ]),
        "config/label_registry/list" => json!([]),
        "assist_pipeline/pipeline/list" => json!({
            "pipelines": [{ "id": "p1", "name": "Home Assistant", "conversation_engine": "homeassistant" }],
            "preferred_pipeline": "p1"
        }),
        "subscribe_entities" | "unsubscribe_events" => Value::Null,
        "call_service" => json!({ "context": { "id": "ctx1" } }),
        _ => {
            return json!({
                "id": id, "type": "result", "success": false,
                "error": { "code": "unknown_command", "message": "Unknown command." }
            });
        }
    };
    json!({ "id": id, "type": "result", "success": true, "result": result })
}

/// Accept connections forever; each one authenticates and answers from
/// `reply_for`. `accept_token` decides whether auth succeeds.
async fn spawn_server(accept_token: bool) -> (url::Url, mpsc::UnboundedReceiver<Conn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = url::Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = accept_async(stream).await else { continue };
            let (req_tx, requests) = mpsc::unbounded_channel();
            let (push, mut push_rx) = mpsc::unbounded_channel::<Value>();
            let _ = conn_tx.send(Conn { requests, push });

            tokio::spawn(async move {
                let hello = json!({ "type": "auth_required", "ha_version": "2025.1.0" });
                if ws.send(Message::text(hello.to_string())).await.is_err() {
                    return;
                }
                loop {
                    tokio::select! {
                        Some(frame) = push_rx.recv() => {
                            if frame.is_null() {
                                let _ = ws.close(None).await;
                                return;
                            }
                            if ws.send(Message::text(frame.to_string())).await.is_err() {
                                return;
                            }
                        }
                        msg = ws.next() => {
                            let Some(Ok(Message::Text(text))) = msg else { return };
                            let req: Value = serde_json::from_str(&text).unwrap();
                            let answer = if req["type"] == "auth" {
                                if accept_token && req["access_token"] == TOKEN {
                                    json!({ "type": "auth_ok", "ha_version": "2025.1.0" })
                                } else {
                                    json!({ "type": "auth_invalid", "message": "Invalid access token" })
                                }
                            } else {
                                reply_for(&req)
                            };
                            let _ = req_tx.send(req);
                            if ws.send(Message::text(answer.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    (url, conn_rx)
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<Conn>) -> Conn {
    tokio::time::timeout(WAIT, conns.recv()).await.unwrap().unwrap()
}

fn controller(url: url::Url) -> Controller {
    let config = SyncConfig {
        url: Some(url),
        token: Some(TOKEN.to_string().into()),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            max_retries: Some(3),
        },
        restart_settle: Duration::from_millis(20),
        voice_agent: Some("homeassistant".into()),
        ..SyncConfig::default()
    };
    Controller::with_parts(
        config,
        SyncContext::default(),
        Some(SnapshotCache::new(MemoryStore::new())),
    )
}

// ── Connect and sync ────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_runs_initial_sync() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let _conn = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    let states = controller.states(false).await.unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(controller.context().selected_pipeline().as_deref(), Some("p1"));

    let registry = controller.registry();
    let hall: Vec<&str> = registry
        .entities_for_area(Some("hall"))
        .unwrap()
        .iter()
        .map(|e| e.entity_id.as_str())
        .collect();
    assert_eq!(hall, ["sensor.hall_temp"]);
    assert!(registry.has_areas_with_floors());

    // The initial sync is persisted.
    assert!(controller.cache().unwrap().summary().is_some());
    controller.disconnect();
}

#[tokio::test]
async fn test_rejected_token_surfaces_auth_failure() {
    let (url, mut conns) = spawn_server(false).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let _conn = next_conn(&mut conns).await;
    let err = controller.wait_synced(WAIT).await.unwrap_err();

    assert!(matches!(err, CoreError::AuthenticationFailed { .. }), "got {err:?}");
    assert!(err.is_terminal());
}

#[tokio::test]
async fn test_toggle_sends_call_service() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let mut conn = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let result = controller.toggle("light.kitchen").await.unwrap();
    assert_eq!(result["context"]["id"], "ctx1");

    let req = conn.expect("call_service").await;
    assert_eq!(req["domain"], "homeassistant");
    assert_eq!(req["service"], "toggle");
    assert_eq!(req["target"], json!({ "entity_id": "light.kitchen" }));
    controller.disconnect();
}

// ── Live subscriptions ──────────────────────────────────────────────

#[tokio::test]
async fn test_entity_diffs_patch_the_context() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let mut conn = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let mut stream = controller
        .subscribe_entities(&["light.kitchen".to_string()])
        .unwrap();
    stream.confirmed().await.unwrap();
    let sub = conn.expect("subscribe_entities").await;
    assert_eq!(sub["entity_ids"], json!(["light.kitchen"]));

    conn.push
        .send(json!({
            "id": sub["id"], "type": "event",
            "event": { "c": { "light.kitchen": { "+": { "s": "off", "lc": 1_735_732_800.0 } } } }
        }))
        .unwrap();
    let diff = tokio::time::timeout(WAIT, stream.next_diff()).await.unwrap().unwrap();

    assert!(diff.changed.contains_key("light.kitchen"));
    assert_eq!(controller.entity("light.kitchen").unwrap().state, "off");
    controller.unsubscribe(stream);
    conn.expect("unsubscribe_events").await;
    controller.disconnect();
}

#[tokio::test]
async fn test_restart_drops_stale_subscriptions() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let mut first = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let mut stream = controller
        .subscribe_entities(&["light.kitchen".to_string()])
        .unwrap();
    stream.confirmed().await.unwrap();
    let old_id = first.expect("subscribe_entities").await["id"].clone();

    controller.set_active_contexts(vec!["main".into()]);
    controller.restart().await.unwrap();
    assert!(controller.is_restarting());
    assert!(controller.context().states().is_none());
    assert_eq!(controller.sync_phase(), SyncPhase::Pending);

    let second = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();
    assert!(!controller.is_restarting());
    assert!(controller.preserved_contexts().is_none());

    // The old subscription ended with the old session.
    assert!(tokio::time::timeout(WAIT, stream.next_diff()).await.unwrap().is_none());

    // An event under the old id on the new socket reaches nobody.
    let revision = controller.context().watch_states();
    second
        .push
        .send(json!({
            "id": old_id, "type": "event",
            "event": { "c": { "light.kitchen": { "+": { "s": "off" } } } }
        }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!revision.has_changed().unwrap());
    assert_eq!(controller.entity("light.kitchen").unwrap().state, "on");
    controller.disconnect();
}

#[tokio::test]
async fn test_server_close_preserves_contexts_and_reconnects() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);
    controller.set_active_contexts(vec!["main".into(), "area:hall".into()]);

    controller.connect().unwrap();
    let first = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let mut state = controller.watch_connection();
    first.push.send(Value::Null).unwrap();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        controller.preserved_contexts().unwrap(),
        vec!["main".to_string(), "area:hall".to_string()]
    );
    assert!(!controller.back_pressed());

    let _second = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    // Back presses propagate again once reconnected.
    assert!(controller.back_pressed());
    assert_eq!(controller.take_preserved_contexts().unwrap().len(), 2);
    controller.disconnect();
}

#[tokio::test]
async fn test_unread_diff_is_dropped_after_restart() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let mut first = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let mut stream = controller
        .subscribe_entities(&["light.kitchen".to_string()])
        .unwrap();
    stream.confirmed().await.unwrap();
    let id = first.expect("subscribe_entities").await["id"].clone();

    // Delivered to the client but never read before the restart.
    first
        .push
        .send(json!({
            "id": id, "type": "event",
            "event": { "c": { "light.kitchen": { "+": { "s": "stale" } } } }
        }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    controller.restart().await.unwrap();
    let _second = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();
    assert_eq!(controller.entity("light.kitchen").unwrap().state, "on");

    assert!(!stream.is_current());
    assert!(stream.next_diff().await.is_none());
    assert_eq!(controller.entity("light.kitchen").unwrap().state, "on");
    controller.disconnect();
}

#[tokio::test]
async fn test_unread_diff_is_dropped_after_reconnect() {
    let (url, mut conns) = spawn_server(true).await;
    let controller = controller(url);

    controller.connect().unwrap();
    let mut first = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    let mut stream = controller
        .subscribe_entities(&["light.kitchen".to_string()])
        .unwrap();
    stream.confirmed().await.unwrap();
    let id = first.expect("subscribe_entities").await["id"].clone();

    first
        .push
        .send(json!({
            "id": id, "type": "event",
            "event": { "c": { "light.kitchen": { "+": { "s": "stale" } } } }
        }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut state = controller.watch_connection();
    first.push.send(Value::Null).unwrap();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    let _second = next_conn(&mut conns).await;
    controller.wait_synced(WAIT).await.unwrap();

    // The refetch after reconnecting wins over the old connection's diff.
    assert!(stream.next_diff().await.is_none());
    assert_eq!(controller.entity("light.kitchen").unwrap().state, "on");
    controller.disconnect();
}
