// ── Command multiplexer ──
//
// Assigns correlation ids to outbound requests and routes inbound
// `result` / `event` frames back to whoever is waiting on that id.
// Scoped to one session: `reset()` drops every pending entry, which
// closes the waiting channels so no stale reply can ever be delivered.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::message::ServerError;

/// Default correlation-id ceiling. Ids wrap back to 1 above it.
pub const DEFAULT_ID_CEILING: u64 = u32::MAX as u64;

type ReplySender = oneshot::Sender<Result<Value, ServerError>>;

/// A request awaiting its answer.
pub enum PendingCommand {
    /// Removed after the first `result`, success or failure.
    Once { reply: ReplySender },
    /// Survives a successful `result`; every later `event` under the same
    /// id goes to `events`. Removed on failure or explicit unsubscribe.
    Subscription {
        ack: Option<ReplySender>,
        events: mpsc::UnboundedSender<Value>,
    },
}

impl PendingCommand {
    /// Build a one-shot entry and the receiving half for the caller.
    pub fn once() -> (Self, oneshot::Receiver<Result<Value, ServerError>>) {
        let (reply, rx) = oneshot::channel();
        (Self::Once { reply }, rx)
    }

    /// Build a subscription entry with its ack and event receivers.
    pub fn subscription() -> (
        Self,
        oneshot::Receiver<Result<Value, ServerError>>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        let (ack, ack_rx) = oneshot::channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self::Subscription {
                ack: Some(ack),
                events,
            },
            ack_rx,
            events_rx,
        )
    }
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to a waiting entry.
    Delivered,
    /// No entry is waiting on this id.
    Unmatched,
    /// An event arrived for a subscription whose consumer is gone.
    /// The entry was removed; the server side should be unsubscribed.
    Orphaned(u64),
}

/// Correlation-id table for one session.
pub struct CommandMux {
    last_id: u64,
    ceiling: u64,
    open: bool,
    pending: HashMap<u64, PendingCommand>,
}

impl CommandMux {
    pub fn new(ceiling: u64) -> Self {
        Self {
            last_id: 0,
            ceiling: ceiling.max(1),
            open: false,
            pending: HashMap::new(),
        }
    }

    /// Accept registrations (the session has authenticated).
    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Tear down the session's bookkeeping: stop accepting registrations,
    /// drop every pending entry, and restart ids from 1.
    pub fn reset(&mut self) {
        self.open = false;
        self.last_id = 0;
        self.pending.clear();
    }

    /// Register a pending command and return its freshly assigned id.
    pub fn register(&mut self, command: PendingCommand) -> Result<u64, Error> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        let id = self.next_id()?;
        self.pending.insert(id, command);
        Ok(id)
    }

    /// Drop the local entry for `id`. Returns `true` if one existed.
    pub fn forget(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Route a `result` frame.
    pub fn on_result(
        &mut self,
        id: u64,
        success: bool,
        result: Value,
        error: Option<ServerError>,
    ) -> Dispatch {
        let Some(entry) = self.pending.get_mut(&id) else {
            tracing::debug!(id, "result for unknown correlation id");
            return Dispatch::Unmatched;
        };

        if success {
            if let PendingCommand::Subscription { ack, .. } = entry {
                if let Some(ack) = ack.take() {
                    let _ = ack.send(Ok(result));
                }
                return Dispatch::Delivered;
            }
        }

        // Terminal: a one-shot answer, or any failure.
        let outcome = if success {
            Ok(result)
        } else {
            Err(error.unwrap_or_default())
        };
        match self.pending.remove(&id) {
            Some(PendingCommand::Once { reply }) => {
                let _ = reply.send(outcome);
            }
            Some(PendingCommand::Subscription { ack: Some(ack), .. }) => {
                let _ = ack.send(outcome);
            }
            Some(PendingCommand::Subscription { ack: None, .. }) | None => {}
        }
        Dispatch::Delivered
    }

    /// Route an `event` frame.
    pub fn on_event(&mut self, id: u64, event: Value) -> Dispatch {
        match self.pending.get(&id) {
            Some(PendingCommand::Subscription { events, .. }) => {
                if events.send(event).is_ok() {
                    Dispatch::Delivered
                } else {
                    self.pending.remove(&id);
                    Dispatch::Orphaned(id)
                }
            }
            Some(PendingCommand::Once { .. }) => {
                tracing::debug!(id, "event addressed to a one-shot command, ignoring");
                Dispatch::Unmatched
            }
            None => {
                tracing::debug!(id, "event for unknown correlation id");
                Dispatch::Unmatched
            }
        }
    }

    /// Strictly increasing until the ceiling, then wraps to 1, skipping
    /// ids that are still pending.
    fn next_id(&mut self) -> Result<u64, Error> {
        if self.pending.len() as u64 >= self.ceiling {
            return Err(Error::PendingTableFull {
                ceiling: self.ceiling,
            });
        }
        loop {
            self.last_id = if self.last_id >= self.ceiling {
                1
            } else {
                self.last_id + 1
            };
            if !self.pending.contains_key(&self.last_id) {
                return Ok(self.last_id);
            }
        }
    }
}

impl Default for CommandMux {
    fn default() -> Self {
        Self::new(DEFAULT_ID_CEILING)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
