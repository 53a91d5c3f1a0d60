// ── Connection orchestrator ──
//
// Owns the live session and drives the connection lifecycle: setup
// check, handshake, initial sync, disconnect preservation, and restart.
// Session events are handled on one task per session; events from a
// session that has since been replaced are dropped. Every authenticated
// connection opens a new context epoch, so work begun on an earlier
// connection cannot write into the fresh one.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hasync_api::{Request, SessionConfig, SessionEvent, SessionHandle};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{FileStore, SnapshotCache};
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::EntityState;
use crate::store::{RegistryIndex, StateSnapshot, SyncContext};
use crate::stream::EntityStream;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// URL or token missing; nothing was attempted.
    SetupRequired,
    Connecting,
    Authenticating,
    Connected,
    /// The socket closed. A reconnect follows on its own.
    Disconnected,
    /// Transport failure. A reconnect follows on its own.
    Errored { message: String },
    /// Token rejected. Terminal until the configuration changes.
    AuthRejected { message: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Progress of the initial sync for the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Pending,
    Ready,
    Failed { message: String },
}

// ── Controller ───────────────────────────────────────────────────────

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Nothing happens until
/// [`connect()`](Self::connect) is called.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: SyncConfig,
    context: Arc<SyncContext>,
    cache: Option<SnapshotCache>,
    connection_state: watch::Sender<ConnectionState>,
    sync_phase: watch::Sender<SyncPhase>,
    cancel: CancellationToken,
    session: Mutex<Option<Arc<SessionHandle>>>,
    /// Bumped whenever the session is replaced or torn down.
    generation: AtomicU64,
    restarting: AtomicBool,
    /// Consumer contexts that are currently open. Opaque to the core.
    active_contexts: Mutex<Vec<String>>,
    /// Contexts saved on the first disconnect, for restoration.
    preserved_contexts: Mutex<Option<Vec<String>>>,
    reconnecting: AtomicBool,
    back_presses: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Controller {
    /// Build a controller with a fresh context and, when enabled, an
    /// on-disk snapshot cache.
    pub fn new(config: SyncConfig) -> Self {
        let context = SyncContext::new(
            Duration::from_secs(config.refresh_interval_secs),
            config.voice_agent.clone(),
        );
        let cache = if config.cache_enabled {
            config
                .resolved_cache_dir()
                .map(|dir| SnapshotCache::new(FileStore::new(dir)))
        } else {
            None
        };
        Self::with_parts(config, context, cache)
    }

    /// Build a controller around an existing context and cache.
    pub fn with_parts(config: SyncConfig, context: SyncContext, cache: Option<SnapshotCache>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Idle);
        let (sync_phase, _) = watch::channel(SyncPhase::Pending);
        Self {
            inner: Arc::new(ControllerInner {
                config,
                context: Arc::new(context),
                cache,
                connection_state,
                sync_phase,
                cancel: CancellationToken::new(),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                restarting: AtomicBool::new(false),
                active_contexts: Mutex::new(Vec::new()),
                preserved_contexts: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                back_presses: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.context
    }

    pub fn cache(&self) -> Option<&SnapshotCache> {
        self.inner.cache.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state.borrow().clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.inner.sync_phase.borrow().clone()
    }

    pub fn is_restarting(&self) -> bool {
        self.inner.restarting.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        self.inner.connection_state.send_replace(state);
    }

    fn session(&self) -> Option<Arc<SessionHandle>> {
        lock(&self.inner.session).clone()
    }

    fn require_session(&self) -> Result<Arc<SessionHandle>, CoreError> {
        self.session().ok_or(CoreError::NotConnected)
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open a session if URL and token are configured.
    ///
    /// Returns once the session task is spawned; progress is reported
    /// through [`watch_connection()`](Self::watch_connection). On a cold
    /// start the snapshot cache is loaded first so reads can be served
    /// before the initial sync lands.
    pub fn connect(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let (Some(url), Some(token)) = (config.url.clone(), config.token.clone()) else {
            let missing = if config.url.is_none() { "URL" } else { "access token" };
            warn!(missing, "setup required, not connecting");
            self.set_state(ConnectionState::SetupRequired);
            return Err(CoreError::SetupRequired { missing });
        };

        // Cold start only; a restart must not bring back what it discarded.
        if !self.is_restarting() && self.inner.context.states().is_none() {
            if let Some(cache) = &self.inner.cache {
                if cache.load(&self.inner.context) {
                    info!("snapshot cache restored");
                }
            }
        }

        self.set_state(ConnectionState::Connecting);
        self.inner.sync_phase.send_replace(SyncPhase::Pending);

        let mut session_config = SessionConfig::new(url.clone(), token);
        session_config.reconnect = config.reconnect.clone();
        session_config.id_ceiling = config.id_ceiling;

        let (session, events) = SessionHandle::connect(session_config, self.inner.cancel.child_token())
            .map_err(|e| CoreError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = lock(&self.inner.session).replace(Arc::new(session)) {
            previous.shutdown();
        }

        let controller = self.clone();
        tokio::spawn(async move { controller.run_events(generation, events).await });
        info!(url = %url, "connecting");
        Ok(())
    }

    async fn run_events(self, generation: u64, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "event from a replaced session, dropping");
                return;
            }
            self.handle_session_event(event);
        }
    }

    /// React to one lifecycle event from the current session.
    pub fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => self.set_state(ConnectionState::Authenticating),
            SessionEvent::Authenticated { ha_version } => {
                info!(?ha_version, "connected");
                self.inner.restarting.store(false, Ordering::SeqCst);
                self.inner.reconnecting.store(false, Ordering::SeqCst);
                self.inner.back_presses.store(0, Ordering::SeqCst);
                let epoch = self.inner.context.advance_epoch();
                self.set_state(ConnectionState::Connected);

                let controller = self.clone();
                tokio::spawn(async move { controller.run_initial_sync(epoch).await });
            }
            SessionEvent::AuthRejected { message } => {
                self.set_state(ConnectionState::AuthRejected { message });
            }
            SessionEvent::Error(message) => {
                self.set_state(ConnectionState::Errored { message });
            }
            SessionEvent::Closed => self.handle_disconnect(),
            SessionEvent::Stopped => {
                self.inner.connection_state.send_if_modified(|state| {
                    if matches!(state, ConnectionState::AuthRejected { .. }) {
                        false
                    } else {
                        *state = ConnectionState::Disconnected;
                        true
                    }
                });
            }
        }
    }

    /// Enter the reconnecting presentation.
    ///
    /// No-op while a restart is in progress. The active consumer contexts
    /// are preserved on the first call only; duplicate close events leave
    /// the saved set alone.
    pub fn handle_disconnect(&self) {
        if self.is_restarting() {
            debug!("connection closed during restart, nothing to preserve");
            return;
        }

        self.inner.connection_state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Errored { .. }) {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        self.inner.sync_phase.send_replace(SyncPhase::Pending);

        let mut preserved = lock(&self.inner.preserved_contexts);
        if preserved.is_none() {
            let contexts = lock(&self.inner.active_contexts).clone();
            debug!(contexts = contexts.len(), "preserving consumer contexts");
            *preserved = Some(contexts);
            self.inner.back_presses.store(0, Ordering::SeqCst);
            self.inner.reconnecting.store(true, Ordering::SeqCst);
        }
    }

    /// Register a back/cancel press from the consumer.
    ///
    /// While reconnecting, presses short of the configured count are
    /// absorbed (`false`); the last one propagates (`true`). Outside the
    /// reconnecting presentation every press propagates.
    pub fn back_pressed(&self) -> bool {
        if !self.inner.reconnecting.load(Ordering::SeqCst) {
            return true;
        }
        let presses = self.inner.back_presses.fetch_add(1, Ordering::SeqCst) + 1;
        presses >= self.inner.config.exit_presses
    }

    pub fn set_active_contexts(&self, contexts: Vec<String>) {
        *lock(&self.inner.active_contexts) = contexts;
    }

    /// The contexts saved by the last disconnect, if any.
    pub fn preserved_contexts(&self) -> Option<Vec<String>> {
        lock(&self.inner.preserved_contexts).clone()
    }

    /// Hand the saved contexts back for restoration and forget them.
    pub fn take_preserved_contexts(&self) -> Option<Vec<String>> {
        lock(&self.inner.preserved_contexts).take()
    }

    /// Tear everything down and connect again after the settle delay.
    ///
    /// The restart flag stays set until the new session authenticates.
    pub async fn restart(&self) -> Result<(), CoreError> {
        info!("restarting");
        self.inner.restarting.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(session) = lock(&self.inner.session).take() {
            debug!(pending = session.pending_count(), "closing session");
            session.shutdown();
        }
        self.inner.context.reset();
        *lock(&self.inner.preserved_contexts) = None;
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.inner.sync_phase.send_replace(SyncPhase::Pending);
        self.set_state(ConnectionState::Connecting);

        tokio::time::sleep(self.inner.config.restart_settle).await;

        let result = self.connect();
        if result.is_err() {
            self.inner.restarting.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Close the session for good and persist what was synchronized.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let session = lock(&self.inner.session).take();
        if let Some(session) = session {
            session.shutdown();
            self.save_cache();
        }
        self.set_state(ConnectionState::Idle);
        info!("disconnected");
    }

    /// Wait until the current connection has finished its initial sync.
    pub async fn wait_synced(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut state = self.inner.connection_state.subscribe();
        let mut phase = self.inner.sync_phase.subscribe();

        let wait = async {
            loop {
                match &*state.borrow_and_update() {
                    ConnectionState::SetupRequired => {
                        return Err(CoreError::SetupRequired {
                            missing: if self.inner.config.url.is_none() {
                                "URL"
                            } else {
                                "access token"
                            },
                        });
                    }
                    ConnectionState::AuthRejected { message } => {
                        return Err(CoreError::AuthenticationFailed {
                            message: message.clone(),
                        });
                    }
                    _ => {}
                }
                match &*phase.borrow_and_update() {
                    SyncPhase::Ready => return Ok(()),
                    SyncPhase::Failed { message } => {
                        return Err(CoreError::Internal(format!("Initial sync failed: {message}")));
                    }
                    SyncPhase::Pending => {}
                }
                tokio::select! {
                    changed = state.changed() => changed.map_err(|_| CoreError::Disconnected)?,
                    changed = phase.changed() => changed.map_err(|_| CoreError::Disconnected)?,
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                what: "initial sync".into(),
                timeout_secs: timeout.as_secs(),
            })?
    }

    // ── Initial sync ─────────────────────────────────────────────────

    async fn run_initial_sync(&self, epoch: u64) {
        let result = self.initial_sync().await;
        if !self.inner.context.is_current(epoch) {
            debug!(epoch, "initial sync superseded, leaving the phase alone");
            return;
        }
        match result {
            Ok(()) => {
                self.inner.sync_phase.send_replace(SyncPhase::Ready);
            }
            Err(e) => {
                warn!(error = %e, "initial sync failed");
                self.inner.sync_phase.send_replace(SyncPhase::Failed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Fetch states, registries, and pipelines, then persist them.
    pub async fn initial_sync(&self) -> Result<(), CoreError> {
        let session = self.require_session()?;
        let ctx = &self.inner.context;
        let epoch = ctx.epoch();

        tokio::try_join!(
            ctx.refresh(session.as_ref()),
            ctx.refresh_registries(session.as_ref()),
        )?;
        if let Err(e) = ctx.refresh_pipelines(session.as_ref()).await {
            warn!(error = %e, "assist pipelines unavailable");
        }
        if !ctx.is_current(epoch) {
            return Err(CoreError::Disconnected);
        }

        self.save_cache();
        info!(
            entities = ctx.states().map_or(0, |s| s.len()),
            "initial sync complete"
        );
        Ok(())
    }

    // ── Cache ────────────────────────────────────────────────────────

    /// Persist the context. `false` when caching is off or failed.
    pub fn save_cache(&self) -> bool {
        self.inner
            .cache
            .as_ref()
            .is_some_and(|cache| cache.save(&self.inner.context))
    }

    /// Restore the context from the cache. `false` when absent.
    pub fn load_cache(&self) -> bool {
        self.inner
            .cache
            .as_ref()
            .is_some_and(|cache| cache.load(&self.inner.context))
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current states, TTL-gated.
    ///
    /// Without a session a fresh snapshot is still served; anything else
    /// fails with `NotConnected`.
    pub async fn states(&self, ignore_cache: bool) -> Result<Arc<StateSnapshot>, CoreError> {
        let ctx = &self.inner.context;
        match self.session() {
            Some(session) => ctx.get_states(session.as_ref(), ignore_cache).await,
            None => ctx
                .states()
                .filter(|s| !ignore_cache && s.is_fresh(ctx.state_ttl))
                .ok_or(CoreError::NotConnected),
        }
    }

    pub async fn refresh(&self) -> Result<Arc<StateSnapshot>, CoreError> {
        self.states(true).await
    }

    /// One entity from the held snapshot.
    pub fn entity(&self, entity_id: &str) -> Result<EntityState, CoreError> {
        self.inner
            .context
            .states()
            .and_then(|s| s.get(entity_id).cloned())
            .ok_or_else(|| CoreError::EntityNotFound {
                entity_id: entity_id.to_owned(),
            })
    }

    pub async fn refresh_registries(&self) -> Result<(), CoreError> {
        let session = self.require_session()?;
        self.inner.context.refresh_registries(session.as_ref()).await
    }

    pub async fn refresh_pipelines(&self) -> Result<(), CoreError> {
        let session = self.require_session()?;
        self.inner.context.refresh_pipelines(session.as_ref()).await
    }

    /// Query view over the current registry snapshots.
    pub fn registry(&self) -> RegistryIndex {
        self.inner.context.registry()
    }

    // ── Service calls ────────────────────────────────────────────────

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Value>,
    ) -> Result<Value, CoreError> {
        let session = self.require_session()?;
        debug!(domain, service, "calling service");
        session
            .send(Request::call_service(domain, service, service_data, target))?
            .wait()
            .await
            .map_err(|e| CoreError::fetch("call_service", e))
    }

    pub async fn turn_on(&self, entity_id: &str) -> Result<Value, CoreError> {
        self.entity_service("turn_on", entity_id).await
    }

    pub async fn turn_off(&self, entity_id: &str) -> Result<Value, CoreError> {
        self.entity_service("turn_off", entity_id).await
    }

    pub async fn toggle(&self, entity_id: &str) -> Result<Value, CoreError> {
        self.entity_service("toggle", entity_id).await
    }

    async fn entity_service(&self, service: &str, entity_id: &str) -> Result<Value, CoreError> {
        self.call_service(
            "homeassistant",
            service,
            None,
            Some(json!({ "entity_id": entity_id })),
        )
        .await
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to compressed state diffs for `entity_ids`.
    pub fn subscribe_entities(&self, entity_ids: &[String]) -> Result<EntityStream, CoreError> {
        let session = self.require_session()?;
        let subscription = session.subscribe(Request::subscribe_entities(entity_ids))?;
        debug!(id = subscription.id(), entities = entity_ids.len(), "subscribed to entities");
        Ok(EntityStream::new(subscription, Arc::clone(&self.inner.context)))
    }

    /// Drop the stream locally and ask the server to stop.
    pub fn unsubscribe(&self, stream: EntityStream) {
        if let Some(session) = self.session() {
            session.unsubscribe(stream.id());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn unconfigured() -> Controller {
        Controller::with_parts(SyncConfig::default(), SyncContext::default(), None)
    }

    #[test]
    fn connect_without_setup_is_refused() {
        let controller = unconfigured();
        let err = controller.connect().unwrap_err();
        assert!(matches!(err, CoreError::SetupRequired { missing: "URL" }));
        assert_eq!(controller.connection_state(), ConnectionState::SetupRequired);
    }

    #[test]
    fn connect_without_token_names_it() {
        let config = SyncConfig {
            url: Some("http://ha.local:8123".parse().unwrap()),
            ..SyncConfig::default()
        };
        let controller = Controller::with_parts(config, SyncContext::default(), None);
        assert!(matches!(
            controller.connect(),
            Err(CoreError::SetupRequired { missing: "access token" })
        ));
    }

    #[test]
    fn duplicate_disconnect_preserves_once() {
        let controller = unconfigured();
        controller.set_active_contexts(vec!["main".into(), "area:kitchen".into()]);

        controller.handle_disconnect();
        controller.set_active_contexts(vec!["loading".into()]);
        controller.handle_disconnect();

        assert_eq!(
            controller.preserved_contexts().unwrap(),
            vec!["main".to_string(), "area:kitchen".to_string()]
        );
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_during_restart_is_ignored() {
        let controller = unconfigured();
        controller.inner.restarting.store(true, Ordering::SeqCst);
        controller.set_active_contexts(vec!["main".into()]);

        controller.handle_disconnect();

        assert!(controller.preserved_contexts().is_none());
        assert_eq!(controller.connection_state(), ConnectionState::Idle);
    }

    #[test]
    fn third_back_press_propagates() {
        let controller = unconfigured();
        assert!(controller.back_pressed());

        controller.handle_disconnect();
        assert!(!controller.back_pressed());
        assert!(!controller.back_pressed());
        assert!(controller.back_pressed());
    }

    #[test]
    fn errored_survives_the_following_close() {
        let controller = unconfigured();
        controller.handle_session_event(SessionEvent::Error("reset by peer".into()));
        controller.handle_session_event(SessionEvent::Closed);
        assert_eq!(
            controller.connection_state(),
            ConnectionState::Errored {
                message: "reset by peer".into()
            }
        );
    }

    #[test]
    fn auth_rejection_is_sticky() {
        let controller = unconfigured();
        controller.handle_session_event(SessionEvent::AuthRejected {
            message: "Invalid access token".into(),
        });
        controller.handle_session_event(SessionEvent::Stopped);
        assert!(matches!(
            controller.connection_state(),
            ConnectionState::AuthRejected { .. }
        ));
    }

    #[tokio::test]
    async fn wait_synced_reports_auth_rejection() {
        let controller = unconfigured();
        controller.handle_session_event(SessionEvent::AuthRejected {
            message: "Invalid access token".into(),
        });
        let err = controller.wait_synced(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn reads_without_session() {
        let controller = unconfigured();
        assert!(matches!(
            controller.states(false).await,
            Err(CoreError::NotConnected)
        ));
        assert!(matches!(
            controller.turn_on("light.kitchen").await,
            Err(CoreError::NotConnected)
        ));
        assert!(matches!(
            controller.entity("light.kitchen"),
            Err(CoreError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn cache_helpers_follow_configuration() {
        let controller = unconfigured();
        assert!(!controller.save_cache());

        let cached = Controller::with_parts(
            SyncConfig::default(),
            SyncContext::default(),
            Some(SnapshotCache::new(MemoryStore::new())),
        );
        assert!(cached.save_cache());
        assert!(cached.load_cache());
    }
}
