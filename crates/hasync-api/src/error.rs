use thiserror::Error;

/// Top-level error type for the `hasync-api` crate.
///
/// Covers every failure mode of the socket session: setup, the auth
/// handshake, transport, command results, and wire decoding.
/// `hasync-core` maps these into the user-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Setup ───────────────────────────────────────────────────────
    /// The base URL cannot be turned into a WebSocket endpoint.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The base URL uses a scheme other than http(s)/ws(s).
    #[error("Unsupported URL scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the access token. Terminal: never retried.
    #[error("Authentication rejected: {message}")]
    AuthInvalid { message: String },

    // ── Session ─────────────────────────────────────────────────────
    /// A request was attempted while the session is not authenticated.
    /// Requests are never queued.
    #[error("Not connected")]
    NotConnected,

    /// The session ended before the request received its result.
    #[error("Session closed before a result was received")]
    SessionClosed,

    /// Every correlation id below the ceiling is still awaiting a result.
    #[error("All {ceiling} correlation ids are pending")]
    PendingTableFull { ceiling: u64 },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Commands ────────────────────────────────────────────────────
    /// The server answered a request with `success: false`.
    #[error("Command failed ({code}): {message}")]
    Command { code: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if reconnecting cannot fix this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid { .. } | Self::InvalidUrl(_) | Self::UnsupportedScheme { .. }
        )
    }
}
