// ── Synchronization context ──
//
// One explicitly constructed object holding the state list, registry
// snapshots, and pipelines. Each dataset sits behind its own `ArcSwap`,
// so readers load a complete snapshot without locking and writers
// replace it in one store. `reset()` is the single place that forgets
// everything.
//
// Writes are fenced by an epoch. A fetch or subscription started under
// an older epoch must not land in a context that was reset (or handed
// to a new connection) since.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::favorites::Favorites;
use crate::model::{
    Area, Device, EntityDiff, EntityEntry, EntityState, Floor, Label, PipelineList, Snapshot,
};

// ── StateSnapshot ────────────────────────────────────────────────────

/// The full state list with its id index, built together.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    list: Vec<EntityState>,
    index: HashMap<String, usize>,
    fetched_at: Instant,
}

impl StateSnapshot {
    /// Build a snapshot stamped with the current time.
    pub fn new(list: Vec<EntityState>) -> Self {
        Self::at(list, Instant::now())
    }

    pub(crate) fn at(list: Vec<EntityState>, fetched_at: Instant) -> Self {
        let index = build_index(&list);
        Self {
            list,
            index,
            fetched_at,
        }
    }

    /// States in server order.
    pub fn list(&self) -> &[EntityState] {
        &self.list
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.index.get(entity_id).and_then(|&i| self.list.get(i))
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.index.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// When the list was fetched (or restored).
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// True while the snapshot is no older than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() <= ttl
    }

    /// A copy with `diff` applied. Keeps the original fetch time.
    pub(crate) fn with_diff(&self, diff: &EntityDiff) -> Self {
        let mut list = self.list.clone();
        let mut index = self.index.clone();

        for (entity_id, added) in &diff.added {
            let state = added.clone().into_state(entity_id.clone());
            if let Some(slot) = index.get(entity_id).and_then(|&i| list.get_mut(i)) {
                *slot = state;
            } else {
                index.insert(entity_id.clone(), list.len());
                list.push(state);
            }
        }

        for (entity_id, change) in &diff.changed {
            if let Some(slot) = index.get(entity_id).and_then(|&i| list.get_mut(i)) {
                change.apply(slot);
            } else {
                tracing::debug!(%entity_id, "change for unknown entity, ignoring");
            }
        }

        if !diff.removed.is_empty() {
            list.retain(|s| !diff.removed.contains(&s.entity_id));
            index = build_index(&list);
        }

        Self {
            list,
            index,
            fetched_at: self.fetched_at,
        }
    }
}

fn build_index(list: &[EntityState]) -> HashMap<String, usize> {
    list.iter()
        .enumerate()
        .map(|(i, s)| (s.entity_id.clone(), i))
        .collect()
}

// ── SyncContext ──────────────────────────────────────────────────────

/// Everything the engine has synchronized from the backend.
pub struct SyncContext {
    pub(crate) states: ArcSwapOption<StateSnapshot>,
    pub(crate) areas: ArcSwapOption<Snapshot<Area>>,
    pub(crate) floors: ArcSwapOption<Snapshot<Floor>>,
    pub(crate) devices: ArcSwapOption<Snapshot<Device>>,
    pub(crate) entities: ArcSwapOption<Snapshot<EntityEntry>>,
    pub(crate) labels: ArcSwapOption<Snapshot<Label>>,
    pub(crate) pipelines: ArcSwapOption<PipelineList>,
    pub(crate) selected_pipeline: ArcSwapOption<String>,
    pub(crate) favorites: Mutex<Favorites>,
    pub(crate) state_ttl: Duration,
    pub(crate) voice_agent: Option<String>,
    /// Bumped on every state replacement or patch.
    pub(crate) state_revision: watch::Sender<u64>,
    epoch: AtomicU64,
}

impl SyncContext {
    pub fn new(state_ttl: Duration, voice_agent: Option<String>) -> Self {
        let (state_revision, _) = watch::channel(0);
        Self {
            states: ArcSwapOption::empty(),
            areas: ArcSwapOption::empty(),
            floors: ArcSwapOption::empty(),
            devices: ArcSwapOption::empty(),
            entities: ArcSwapOption::empty(),
            labels: ArcSwapOption::empty(),
            pipelines: ArcSwapOption::empty(),
            selected_pipeline: ArcSwapOption::empty(),
            favorites: Mutex::new(Favorites::default()),
            state_ttl,
            voice_agent,
            state_revision,
            epoch: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_favorites(self, favorites: Favorites) -> Self {
        *self.favorites() = favorites;
        self
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn states(&self) -> Option<Arc<StateSnapshot>> {
        self.states.load_full()
    }

    pub fn areas(&self) -> Option<Arc<Snapshot<Area>>> {
        self.areas.load_full()
    }

    pub fn floors(&self) -> Option<Arc<Snapshot<Floor>>> {
        self.floors.load_full()
    }

    pub fn devices(&self) -> Option<Arc<Snapshot<Device>>> {
        self.devices.load_full()
    }

    pub fn entities(&self) -> Option<Arc<Snapshot<EntityEntry>>> {
        self.entities.load_full()
    }

    pub fn labels(&self) -> Option<Arc<Snapshot<Label>>> {
        self.labels.load_full()
    }

    pub fn pipelines(&self) -> Option<Arc<PipelineList>> {
        self.pipelines.load_full()
    }

    pub fn selected_pipeline(&self) -> Option<String> {
        self.selected_pipeline.load_full().map(|s| (*s).clone())
    }

    pub fn favorites(&self) -> MutexGuard<'_, Favorites> {
        self.favorites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observe state list changes (the value is a revision counter).
    pub fn watch_states(&self) -> watch::Receiver<u64> {
        self.state_revision.subscribe()
    }

    // ── Epoch ────────────────────────────────────────────────────────

    /// Current write epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// True while nothing has superseded `epoch`.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Start a new epoch. Work stamped with an older one is discarded.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ── Replacement ──────────────────────────────────────────────────

    pub fn set_areas(&self, areas: Snapshot<Area>) {
        self.areas.store(Some(Arc::new(areas)));
    }

    pub fn set_floors(&self, floors: Snapshot<Floor>) {
        self.floors.store(Some(Arc::new(floors)));
    }

    pub fn set_devices(&self, devices: Snapshot<Device>) {
        self.devices.store(Some(Arc::new(devices)));
    }

    pub fn set_entities(&self, entities: Snapshot<EntityEntry>) {
        self.entities.store(Some(Arc::new(entities)));
    }

    pub fn set_labels(&self, labels: Snapshot<Label>) {
        self.labels.store(Some(Arc::new(labels)));
    }

    /// Store the pipeline list and resolve the selection against it.
    pub fn set_pipelines(&self, pipelines: PipelineList) {
        let current = self.selected_pipeline();
        let selected = pipelines.select(current.as_deref(), self.voice_agent.as_deref());
        self.pipelines.store(Some(Arc::new(pipelines)));
        self.selected_pipeline.store(selected.map(Arc::new));
    }

    /// Override the pipeline selection.
    pub fn select_pipeline(&self, id: Option<String>) {
        self.selected_pipeline.store(id.map(Arc::new));
    }

    /// Forget every synchronized snapshot and start a new epoch.
    /// Favorites survive.
    pub fn reset(&self) {
        self.advance_epoch();
        self.states.store(None);
        self.areas.store(None);
        self.floors.store(None);
        self.devices.store(None);
        self.entities.store(None);
        self.labels.store(None);
        self.pipelines.store(None);
        self.selected_pipeline.store(None);
        self.state_revision.send_modify(|rev| *rev += 1);
        tracing::debug!("sync context reset");
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::index_by_id;
    use serde_json::json;

    fn states() -> Vec<EntityState> {
        serde_json::from_value(json!([
            { "entity_id": "light.a", "state": "on" },
            { "entity_id": "light.b", "state": "off" },
            { "entity_id": "sensor.c", "state": "3" }
        ]))
        .unwrap()
    }

    #[test]
    fn snapshot_index_matches_list() {
        let snapshot = StateSnapshot::new(states());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get("light.b").unwrap().state, "off");
        assert!(snapshot.get("light.z").is_none());
    }

    #[test]
    fn diff_adds_patches_and_removes() {
        let snapshot = StateSnapshot::new(states());
        let diff: EntityDiff = serde_json::from_value(json!({
            "a": { "switch.d": { "s": "on", "a": {} } },
            "c": { "light.a": { "+": { "s": "off" } } },
            "r": ["light.b"]
        }))
        .unwrap();

        let next = snapshot.with_diff(&diff);
        let ids: Vec<&str> = next.list().iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, ["light.a", "sensor.c", "switch.d"]);
        assert_eq!(next.get("light.a").unwrap().state, "off");
        assert_eq!(next.get("switch.d").unwrap().state, "on");
        assert!(!next.contains("light.b"));
        // The original is untouched.
        assert_eq!(snapshot.get("light.a").unwrap().state, "on");
    }

    #[test]
    fn reset_forgets_everything_but_favorites() {
        let ctx = SyncContext::default();
        ctx.states.store(Some(Arc::new(StateSnapshot::new(states()))));
        ctx.set_labels(index_by_id(Vec::<Label>::new()));
        ctx.favorites().add("light.a".into(), None);
        ctx.select_pipeline(Some("p1".into()));

        ctx.reset();

        assert!(ctx.states().is_none());
        assert!(ctx.labels().is_none());
        assert!(ctx.selected_pipeline().is_none());
        assert!(ctx.favorites().contains("light.a"));
    }

    #[test]
    fn reset_supersedes_the_previous_epoch() {
        let ctx = SyncContext::default();
        let before = ctx.epoch();
        assert!(ctx.is_current(before));

        ctx.reset();

        assert!(!ctx.is_current(before));
        assert!(ctx.is_current(ctx.epoch()));
    }
}
