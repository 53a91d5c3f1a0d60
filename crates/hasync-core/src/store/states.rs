// ── State synchronizer ──
//
// TTL-gated `get_states`, forced refresh, and in-place application of
// `subscribe_entities` diffs. Replacement swaps the list and its index
// in one store; a failed fetch leaves the previous snapshot untouched,
// and so does one that completes after the context was reset.

use std::sync::Arc;

use hasync_api::Request;
use tokio::time::Instant;

use super::context::{StateSnapshot, SyncContext};
use crate::error::CoreError;
use crate::model::{EntityDiff, EntityState};
use crate::transport::Transport;

impl SyncContext {
    /// Current states, fetching only when needed.
    ///
    /// Reuses the held snapshot when `ignore_cache` is false and it is no
    /// older than the refresh interval; otherwise issues `get_states`.
    /// A reply that arrives after a reset is discarded with
    /// [`CoreError::Disconnected`].
    pub async fn get_states<T: Transport>(
        &self,
        transport: &T,
        ignore_cache: bool,
    ) -> Result<Arc<StateSnapshot>, CoreError> {
        if !ignore_cache {
            if let Some(snapshot) = self.states() {
                if snapshot.is_fresh(self.state_ttl) {
                    tracing::trace!(entities = snapshot.len(), "serving states from cache");
                    return Ok(snapshot);
                }
            }
        }

        let epoch = self.epoch();
        let request = Request::get_states();
        let kind = request.kind.clone();
        let value = transport
            .request(request)
            .await
            .map_err(|e| CoreError::fetch(&kind, e))?;
        let list: Vec<EntityState> = serde_json::from_value(value)
            .map_err(|e| CoreError::Internal(format!("Malformed get_states result: {e}")))?;

        if !self.is_current(epoch) {
            tracing::debug!(entities = list.len(), "states fetched for a reset context, discarding");
            return Err(CoreError::Disconnected);
        }
        tracing::debug!(entities = list.len(), "states fetched");
        Ok(self.install_states(list, Instant::now()))
    }

    /// `get_states` bypassing the TTL.
    pub async fn refresh<T: Transport>(&self, transport: &T) -> Result<Arc<StateSnapshot>, CoreError> {
        self.get_states(transport, true).await
    }

    /// Replace the state list wholesale and resync favorites' names.
    pub fn install_states(&self, list: Vec<EntityState>, fetched_at: Instant) -> Arc<StateSnapshot> {
        let snapshot = Arc::new(StateSnapshot::at(list, fetched_at));
        self.states.store(Some(Arc::clone(&snapshot)));
        self.state_revision.send_modify(|rev| *rev += 1);

        if self.favorites().update_friendly_names(&snapshot) {
            tracing::debug!("favorite names updated");
        }
        snapshot
    }

    /// Apply a `subscribe_entities` diff to the held snapshot.
    ///
    /// Returns `false` when there is no snapshot yet; the first diff of a
    /// subscription carries every subscribed entity, so it seeds one.
    pub fn apply_diff(&self, diff: &EntityDiff) -> bool {
        if diff.is_empty() {
            return true;
        }
        let mut applied = false;
        self.states.rcu(|current| {
            applied = current.is_some() || !diff.added.is_empty();
            match current {
                Some(snapshot) => Some(Arc::new(snapshot.with_diff(diff))),
                None if applied => {
                    let seed = StateSnapshot::at(Vec::new(), Instant::now());
                    Some(Arc::new(seed.with_diff(diff)))
                }
                None => None,
            }
        });
        if applied {
            self.state_revision.send_modify(|rev| *rev += 1);
        }
        applied
    }
}
