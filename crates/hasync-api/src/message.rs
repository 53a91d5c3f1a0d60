// ── Wire protocol ──
//
// JSON messages exchanged over the Home Assistant WebSocket.
// Inbound frames are tagged by `type`; outbound requests carry
// `{id, type, ...}` once the multiplexer has assigned a correlation id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Inbound ─────────────────────────────────────────────────────────

/// A message received from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// First frame after the socket opens. Answered with the stored token.
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// The token was accepted; requests may now be sent.
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// The token was rejected. The server closes the socket next.
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal answer to a request (or the ack of a subscription).
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<ServerError>,
    },
    /// Asynchronous event delivered under a subscription's id.
    Event { id: u64, event: Value },
    /// Any `type` this client does not handle (`pong`, future additions).
    #[serde(other)]
    Unknown,
}

/// Error payload attached to a failed `result`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ── Outbound ────────────────────────────────────────────────────────

/// The authentication frame, sent in reply to `auth_required`.
#[derive(Debug, Serialize)]
pub(crate) struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    pub(crate) fn new(access_token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token,
        }
    }
}

/// An outbound request before a correlation id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// A request tagged with its correlation id, as written to the socket.
#[derive(Debug, Serialize)]
pub(crate) struct Framed<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub request: &'a Request,
}

impl Request {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    /// Add a field to the request body.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    // ── Well-known requests ──────────────────────────────────────────

    pub fn get_states() -> Self {
        Self::new("get_states")
    }

    pub fn get_config() -> Self {
        Self::new("get_config")
    }

    pub fn area_registry() -> Self {
        Self::new("config/area_registry/list")
    }

    pub fn floor_registry() -> Self {
        Self::new("config/floor_registry/list")
    }

    pub fn device_registry() -> Self {
        Self::new("config/device_registry/list")
    }

    pub fn entity_registry() -> Self {
        Self::new("config/entity_registry/list")
    }

    pub fn label_registry() -> Self {
        Self::new("config/label_registry/list")
    }

    pub fn pipelines() -> Self {
        Self::new("assist_pipeline/pipeline/list")
    }

    /// Compressed state stream for a set of entities.
    pub fn subscribe_entities(entity_ids: &[String]) -> Self {
        Self::new("subscribe_entities").with("entity_ids", entity_ids.to_vec())
    }

    /// State trigger on a single entity.
    pub fn subscribe_state_trigger(entity_id: &str) -> Self {
        Self::new("subscribe_trigger").with(
            "trigger",
            serde_json::json!({ "platform": "state", "entity_id": entity_id }),
        )
    }

    pub fn unsubscribe(subscription: u64) -> Self {
        Self::new("unsubscribe_events").with("subscription", subscription)
    }

    /// `call_service`; `service_data` and `target` are omitted when `None`.
    pub fn call_service(
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Value>,
    ) -> Self {
        let mut req = Self::new("call_service")
            .with("domain", domain)
            .with("service", service);
        if let Some(data) = service_data {
            req = req.with("service_data", data);
        }
        if let Some(target) = target {
            req = req.with("target", target);
        }
        req
    }
}

// ── Tests ────────────────────────────────────────────────────────────
