//! WebSocket session with auth handshake, request multiplexing, and
//! auto-reconnect.
//!
//! A [`SessionHandle`] owns one background task that keeps a socket to
//! `<base>/api/websocket` alive. On every (re)connect the task answers
//! `auth_required` with the stored token on its own; requests are accepted
//! only after `auth_ok`. A rejected token stops the task for good, while
//! transient failures are retried with exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use hasync_api::{Request, SessionConfig, SessionHandle, SessionEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SessionConfig::new("http://homeassistant.local:8123".parse()?, token);
//! let (session, mut events) = SessionHandle::connect(config, CancellationToken::new())?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Authenticated { .. } = event {
//!         let states = session.send(Request::get_states())?.wait().await?;
//!         println!("{} entities", states.as_array().map_or(0, Vec::len));
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::command::{CommandMux, DEFAULT_ID_CEILING, Dispatch, PendingCommand};
use crate::error::Error;
use crate::message::{AuthMessage, Framed, Inbound, Request, ServerError};

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 2.5s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2500),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── SessionConfig ────────────────────────────────────────────────────

/// Everything a session needs to reach and authenticate with the server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL, e.g. `http://homeassistant.local:8123`.
    pub url: Url,
    /// Long-lived access token.
    pub token: SecretString,
    pub reconnect: ReconnectConfig,
    /// Correlation ids wrap back to 1 above this value.
    pub id_ceiling: u64,
}

impl SessionConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            reconnect: ReconnectConfig::default(),
            id_ceiling: DEFAULT_ID_CEILING,
        }
    }
}

// ── Status & lifecycle events ────────────────────────────────────────

/// Connection status of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Erroring,
}

/// Lifecycle notifications emitted by the session task, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Socket is open; the handshake is in progress.
    Opened,
    /// `auth_ok` received. Requests are accepted from now on.
    Authenticated { ha_version: Option<String> },
    /// `auth_invalid` received. The task stops after this.
    AuthRejected { message: String },
    /// Transport failure. A reconnect follows unless retries are exhausted.
    Error(String),
    /// The socket closed. A reconnect follows unless the task is stopping.
    Closed,
    /// The task exited; no further events will be sent.
    Stopped,
}

// ── Reply / Subscription ─────────────────────────────────────────────

/// The eventual answer to a one-shot request.
#[derive(Debug)]
pub struct Reply {
    id: u64,
    rx: oneshot::Receiver<Result<Value, ServerError>>,
}

impl Reply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the `result` frame.
    pub async fn wait(self) -> Result<Value, Error> {
        into_outcome(self.rx.await)
    }
}

/// A live subscription: an ack followed by any number of events.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    ack: Option<oneshot::Receiver<Result<Value, ServerError>>>,
    events: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the server to accept the subscription.
    ///
    /// Resolves once; later calls return `Ok(Value::Null)`.
    pub async fn confirmed(&mut self) -> Result<Value, Error> {
        match self.ack.take() {
            Some(rx) => into_outcome(rx.await),
            None => Ok(Value::Null),
        }
    }

    /// Next event payload. `None` once the subscription is gone
    /// (unsubscribed, failed, or the session closed).
    pub async fn next_event(&mut self) -> Option<Value> {
        self.events.recv().await
    }
}

fn into_outcome(
    received: Result<Result<Value, ServerError>, oneshot::error::RecvError>,
) -> Result<Value, Error> {
    match received {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::Command {
            code: e.code,
            message: e.message,
        }),
        Err(_) => Err(Error::SessionClosed),
    }
}

// ── SessionHandle ────────────────────────────────────────────────────

/// State shared between the handle and the socket task.
struct Shared {
    token: SecretString,
    mux: Mutex<CommandMux>,
    status: watch::Sender<SessionStatus>,
    events: mpsc::UnboundedSender<SessionEvent>,
    write_tx: mpsc::UnboundedSender<String>,
}

impl Shared {
    fn mux(&self) -> MutexGuard<'_, CommandMux> {
        self.mux.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    fn emit(&self, event: SessionEvent) {
        // No receiver just means nobody is listening for lifecycle events.
        let _ = self.events.send(event);
    }

    /// Register `command`, frame `request` with the new id, and queue it.
    fn submit(&self, request: &Request, command: PendingCommand) -> Result<u64, Error> {
        let mut mux = self.mux();
        let id = mux.register(command)?;
        let text = match serde_json::to_string(&Framed { id, request }) {
            Ok(text) => text,
            Err(e) => {
                mux.forget(id);
                return Err(Error::Deserialization {
                    message: e.to_string(),
                    body: String::new(),
                });
            }
        };
        if self.write_tx.send(text).is_err() {
            mux.forget(id);
            return Err(Error::NotConnected);
        }
        tracing::trace!(id, kind = %request.kind, "request queued");
        Ok(id)
    }

    /// Drop every pending entry and stop accepting requests.
    fn close_session(&self) {
        self.mux().reset();
    }

    /// Handle one inbound text frame. Returns a frame to write back, if any.
    fn on_text(&self, text: &str) -> Result<Option<String>, Error> {
        let msg: Inbound = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "failed to parse inbound frame");
                return Ok(None);
            }
        };

        match msg {
            Inbound::AuthRequired { ha_version } => {
                tracing::debug!(?ha_version, "auth required, sending token");
                let auth = AuthMessage::new(self.token.expose_secret());
                serde_json::to_string(&auth)
                    .map(Some)
                    .map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body: String::new(),
                    })
            }
            Inbound::AuthOk { ha_version } => {
                self.mux().open();
                self.set_status(SessionStatus::Connected);
                tracing::info!(?ha_version, "session authenticated");
                self.emit(SessionEvent::Authenticated { ha_version });
                Ok(None)
            }
            Inbound::AuthInvalid { message } => {
                let message = message.unwrap_or_else(|| "Unknown error".into());
                tracing::error!(%message, "access token rejected");
                self.emit(SessionEvent::AuthRejected {
                    message: message.clone(),
                });
                Err(Error::AuthInvalid { message })
            }
            Inbound::Result {
                id,
                success,
                result,
                error,
            } => {
                self.mux().on_result(id, success, result, error);
                Ok(None)
            }
            Inbound::Event { id, event } => {
                let mut mux = self.mux();
                if let Dispatch::Orphaned(orphan) = mux.on_event(id, event) {
                    tracing::debug!(id = orphan, "subscription consumer gone, unsubscribing");
                    let (command, _rx) = PendingCommand::once();
                    let unsub_id = mux.register(command)?;
                    let request = Request::unsubscribe(orphan);
                    let text = serde_json::to_string(&Framed {
                        id: unsub_id,
                        request: &request,
                    })
                    .map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body: String::new(),
                    })?;
                    return Ok(Some(text));
                }
                Ok(None)
            }
            Inbound::Unknown => {
                tracing::trace!("ignoring unhandled message type");
                Ok(None)
            }
        }
    }
}

/// Handle to a running session task.
///
/// Dropping the handle does not stop the task; call
/// [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)).
pub struct SessionHandle {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Validate the URL and spawn the session task.
    ///
    /// Returns immediately; the first connection attempt happens
    /// asynchronously and is reported through the returned event receiver.
    pub fn connect(
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), Error> {
        let ws_url = websocket_url(&config.url)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::Disconnected);

        let shared = Arc::new(Shared {
            token: config.token,
            mux: Mutex::new(CommandMux::new(config.id_ceiling)),
            status,
            events: event_tx,
            write_tx,
        });

        let task_shared = Arc::clone(&shared);
        let task_cancel = cancel.clone();
        let reconnect = config.reconnect;
        tokio::spawn(async move {
            session_loop(ws_url, task_shared, write_rx, reconnect, task_cancel).await;
        });

        Ok((Self { shared, cancel }, event_rx))
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.mux().is_open()
    }

    /// Send a one-shot request.
    ///
    /// Fails with [`Error::NotConnected`] unless the session is
    /// authenticated; nothing is queued for later.
    pub fn send(&self, request: Request) -> Result<Reply, Error> {
        let (command, rx) = PendingCommand::once();
        let id = self.shared.submit(&request, command)?;
        Ok(Reply { id, rx })
    }

    /// Send a request whose id stays live for subsequent events.
    pub fn subscribe(&self, request: Request) -> Result<Subscription, Error> {
        let (command, ack, events) = PendingCommand::subscription();
        let id = self.shared.submit(&request, command)?;
        Ok(Subscription {
            id,
            ack: Some(ack),
            events,
        })
    }

    /// Forget the local entry for `id` and ask the server to stop sending.
    ///
    /// The local entry is removed whether or not the remote request can be
    /// sent or is acknowledged.
    pub fn unsubscribe(&self, id: u64) {
        self.shared.mux().forget(id);
        if let Err(e) = self.send(Request::unsubscribe(id)) {
            tracing::debug!(id, error = %e, "remote unsubscribe skipped");
        }
    }

    /// Number of requests awaiting a result (subscriptions included).
    pub fn pending_count(&self) -> usize {
        self.shared.mux().len()
    }

    /// Signal the background task to close the socket and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → authenticate → read → on close, backoff → reconnect.
async fn session_loop(
    ws_url: Url,
    shared: Arc<Shared>,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_status(SessionStatus::Connecting);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_run(&ws_url, &shared, &mut write_rx, &cancel) => result,
        };

        // Whatever happened, this session's pending table is done.
        shared.close_session();
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => {
                tracing::info!("session closed, reconnecting");
                shared.set_status(SessionStatus::Disconnected);
                shared.emit(SessionEvent::Closed);
                attempt = 0;
            }
            Err(e) if e.is_terminal() => {
                tracing::error!(error = %e, "session ended permanently");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "session error");
                shared.set_status(SessionStatus::Erroring);
                shared.emit(SessionEvent::Error(e.to_string()));
                shared.emit(SessionEvent::Closed);

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "reconnection limit reached, giving up"
                        );
                        break;
                    }
                }
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    shared.close_session();
    shared.set_status(SessionStatus::Disconnected);
    shared.emit(SessionEvent::Stopped);
    tracing::debug!("session loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one socket and pump it until it drops.
///
/// `Ok(())` means a clean close (close frame, end of stream, or
/// cancellation); errors carry the failure that ended the socket.
async fn connect_and_run(
    url: &Url,
    shared: &Shared,
    write_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    // Frames queued for a previous socket belong to a dead session.
    while write_rx.try_recv().is_ok() {}

    shared.set_status(SessionStatus::Authenticating);
    shared.emit(SessionEvent::Opened);
    tracing::debug!("socket open, awaiting auth_required");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            Some(text) = write_rx.recv() => {
                write
                    .send(tungstenite::Message::text(text))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match shared.on_text(&text) {
                            Ok(Some(reply)) => {
                                write
                                    .send(tungstenite::Message::text(reply))
                                    .await
                                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                let _ = write.send(tungstenite::Message::Close(None)).await;
                                return Err(e);
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) if !matches!(cf.code, CloseCode::Normal | CloseCode::Away) => {
                                tracing::warn!(
                                    code = %cf.code,
                                    reason = %cf.reason,
                                    "abnormal close frame received"
                                );
                                Err(Error::WebSocketClosed {
                                    code: u16::from(cf.code),
                                    reason: cf.reason.to_string(),
                                })
                            }
                            Some(cf) => {
                                tracing::info!(code = %cf.code, "close frame received");
                                Ok(())
                            }
                            None => {
                                tracing::info!("close frame received (no payload)");
                                Ok(())
                            }
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── URL derivation ───────────────────────────────────────────────────

/// `http(s)://host[:port][/prefix]` → `ws(s)://host[:port][/prefix]/api/websocket`.
pub fn websocket_url(base: &Url) -> Result<Url, Error> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::UnsupportedScheme {
                scheme: other.to_owned(),
            });
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::UnsupportedScheme {
            scheme: base.scheme().to_owned(),
        })?;
    let path = format!("{}/api/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25%, seeded from the attempt number.
#[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> (
        Shared,
        mpsc::UnboundedReceiver<SessionEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::Authenticating);
        let shared = Shared {
            token: SecretString::from("abc123".to_string()),
            mux: Mutex::new(CommandMux::default()),
            status,
            events,
            write_tx,
        };
        (shared, event_rx, write_rx)
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(2500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        assert!(
            d10 <= Duration::from_millis(12_500),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn websocket_url_from_http_base() {
        let base = Url::parse("http://homeassistant.local:8123/").unwrap();
        assert_eq!(
            websocket_url(&base).unwrap().as_str(),
            "ws://homeassistant.local:8123/api/websocket"
        );

        let base = Url::parse("https://example.org/ha//").unwrap();
        assert_eq!(
            websocket_url(&base).unwrap().as_str(),
            "wss://example.org/ha/api/websocket"
        );
    }

    #[test]
    fn websocket_url_rejects_other_schemes() {
        let base = Url::parse("ftp://example.org").unwrap();
        assert!(matches!(
            websocket_url(&base),
            Err(Error::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn auth_required_is_answered_with_token() {
        let (shared, _events, _writes) = shared();
        let reply = shared
            .on_text(r#"{"type":"auth_required","ha_version":"2025.1.0"}"#)
            .unwrap()
            .unwrap();
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v, json!({ "type": "auth", "access_token": "abc123" }));
    }

    #[test]
    fn requests_refused_before_auth_ok() {
        let (shared, _events, _writes) = shared();
        let (cmd, _rx) = PendingCommand::once();
        assert!(matches!(
            shared.submit(&Request::get_states(), cmd),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn auth_ok_opens_session_and_notifies() {
        let (shared, mut events, mut writes) = shared();
        shared
            .on_text(r#"{"type":"auth_ok","ha_version":"2025.1.0"}"#)
            .unwrap();

        assert_eq!(*shared.status.borrow(), SessionStatus::Connected);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Authenticated {
                ha_version: Some("2025.1.0".into())
            }
        );

        let (cmd, _rx) = PendingCommand::once();
        let id = shared.submit(&Request::get_states(), cmd).unwrap();
        let frame: Value = serde_json::from_str(&writes.try_recv().unwrap()).unwrap();
        assert_eq!(frame, json!({ "id": id, "type": "get_states" }));
    }

    #[test]
    fn auth_invalid_is_terminal() {
        let (shared, mut events, _writes) = shared();
        let err = shared
            .on_text(r#"{"type":"auth_invalid","message":"Invalid access token"}"#)
            .unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::AuthRejected {
                message: "Invalid access token".into()
            }
        );
    }

    #[test]
    fn orphaned_event_triggers_remote_unsubscribe() {
        let (shared, _events, _writes) = shared();
        shared.on_text(r#"{"type":"auth_ok"}"#).unwrap();

        let (cmd, _ack, events) = PendingCommand::subscription();
        let id = shared.submit(&Request::get_states(), cmd).unwrap();
        drop(events);

        let frame = json!({ "id": id, "type": "event", "event": {} }).to_string();
        let reply = shared.on_text(&frame).unwrap().unwrap();
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["type"], "unsubscribe_events");
        assert_eq!(v["subscription"], id);
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (shared, _events, _writes) = shared();
        assert!(shared.on_text("not json at all").unwrap().is_none());
    }
}
