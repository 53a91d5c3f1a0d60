// ── Live entity stream ──
//
// Wraps a `subscribe_entities` subscription. Each event is decoded as a
// compressed diff and applied to the sync context before the caller sees
// it, so readers of the context and readers of the stream agree.
// A stream belongs to the context epoch it was opened in; once the
// context is reset or handed to a new connection, it ends.

use std::sync::Arc;

use hasync_api::Subscription;

use crate::error::CoreError;
use crate::model::EntityDiff;
use crate::store::SyncContext;

/// A live `subscribe_entities` subscription.
pub struct EntityStream {
    subscription: Subscription,
    context: Arc<SyncContext>,
    epoch: u64,
}

impl EntityStream {
    pub(crate) fn new(subscription: Subscription, context: Arc<SyncContext>) -> Self {
        let epoch = context.epoch();
        Self {
            subscription,
            context,
            epoch,
        }
    }

    /// Correlation id of the underlying subscription.
    pub fn id(&self) -> u64 {
        self.subscription.id()
    }

    /// False once the context has moved past the epoch this stream was
    /// opened in.
    pub fn is_current(&self) -> bool {
        self.context.is_current(self.epoch)
    }

    /// Wait for the server to accept the subscription.
    pub async fn confirmed(&mut self) -> Result<(), CoreError> {
        self.subscription
            .confirmed()
            .await
            .map(drop)
            .map_err(|e| CoreError::fetch("subscribe_entities", e))
    }

    /// Next diff, already applied to the context.
    ///
    /// Malformed events are logged and skipped. `None` once the
    /// subscription is gone (unsubscribed, failed, or session replaced).
    /// Events still buffered from a superseded epoch are dropped unread.
    pub async fn next_diff(&mut self) -> Option<EntityDiff> {
        loop {
            if !self.is_current() {
                tracing::debug!(id = self.id(), "subscription superseded, ending stream");
                return None;
            }
            let event = self.subscription.next_event().await?;
            if !self.is_current() {
                tracing::debug!(id = self.id(), "dropping event from a superseded subscription");
                return None;
            }
            match serde_json::from_value::<EntityDiff>(event) {
                Ok(diff) => {
                    if !self.context.apply_diff(&diff) {
                        tracing::debug!(id = self.id(), "diff arrived before any states");
                    }
                    return Some(diff);
                }
                Err(e) => {
                    tracing::warn!(id = self.id(), error = %e, "malformed entity diff, skipping");
                }
            }
        }
    }
}
