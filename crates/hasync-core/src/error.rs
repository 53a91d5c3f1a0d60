// ── Core error types ──
//
// User-facing errors from hasync-core. Consumers never see socket frames
// or JSON decoding failures directly. The `From<hasync_api::Error>` impl
// translates transport-layer errors into this taxonomy. Cache I/O errors
// are absent on purpose: the snapshot cache logs and swallows them.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Setup errors ─────────────────────────────────────────────────
    /// URL or token missing. Never retried.
    #[error("Setup required: no {missing} configured")]
    SetupRequired { missing: &'static str },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Connection errors ────────────────────────────────────────────
    /// The server rejected the token. Terminal.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Cannot connect to Home Assistant at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost before the request completed")]
    Disconnected,

    #[error("Timed out after {timeout_secs}s waiting for {what}")]
    Timeout { what: String, timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    /// A specific request was answered with `success: false`.
    #[error("Request '{request}' failed ({code}): {message}")]
    Fetch {
        request: String,
        code: String,
        message: String,
    },

    /// Area, device, or entity registry not loaded yet.
    #[error("Registries are not loaded yet")]
    RegistriesNotReady,

    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Attach the request kind to a transport error.
    pub fn fetch(request: &str, err: hasync_api::Error) -> Self {
        match err {
            hasync_api::Error::Command { code, message } => Self::Fetch {
                request: request.to_owned(),
                code,
                message,
            },
            other => other.into(),
        }
    }

    /// Returns `true` if retrying (or reconnecting) cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SetupRequired { .. } | Self::Config { .. } | Self::AuthenticationFailed { .. }
        )
    }
}

impl From<crate::store::NotReady> for CoreError {
    fn from(_: crate::store::NotReady) -> Self {
        Self::RegistriesNotReady
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hasync_api::Error> for CoreError {
    fn from(err: hasync_api::Error) -> Self {
        match err {
            hasync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            hasync_api::Error::UnsupportedScheme { scheme } => CoreError::Config {
                message: format!("Unsupported URL scheme '{scheme}' (expected http or https)"),
            },
            hasync_api::Error::AuthInvalid { message } => {
                CoreError::AuthenticationFailed { message }
            }
            hasync_api::Error::NotConnected => CoreError::NotConnected,
            hasync_api::Error::SessionClosed => CoreError::Disconnected,
            hasync_api::Error::PendingTableFull { ceiling } => {
                CoreError::Internal(format!("All {ceiling} correlation ids are in use"))
            }
            hasync_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            hasync_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            hasync_api::Error::Command { code, message } => CoreError::Fetch {
                request: String::new(),
                code,
                message,
            },
            hasync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
