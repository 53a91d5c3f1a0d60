//! Relative-time scheduler.
//!
//! Tracks one timestamp per id and wakes exactly when that id's
//! humanized age ("45 s", "3 m", ...) would next change. All ids share a
//! single priority queue keyed by fire time; re-arming or unregistering
//! an id leaves its old heap entry behind, which is skipped when popped
//! because its generation no longer matches.
//!
//! [`TimerQueue`] is the pure core and takes `now` as a parameter.
//! [`RelativeTimeScheduler`] drives it from a tokio task and delivers
//! [`Tick`]s over a channel.

pub mod humanize;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use humanize::{human_diff, next_change_delay};

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Lower clamp for a computed delay. Default: 500ms.
    pub min_interval: Duration,
    /// Upper clamp for a computed delay. Default: 24h.
    pub max_interval: Duration,
    /// Added after clamping so the fire lands past the boundary. Default: 50ms.
    pub margin: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(24 * 60 * 60),
            margin: Duration::from_millis(50),
        }
    }
}

impl SchedulerConfig {
    /// Clamped and padded delay until `last_changed`'s display changes.
    pub fn delay_for(&self, now: DateTime<Utc>, last_changed: DateTime<Utc>) -> Duration {
        next_change_delay(now, last_changed).clamp(self.min_interval, self.max_interval)
            + self.margin
    }
}

/// Delivered when an id's display should be redrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub id: String,
    pub last_changed: DateTime<Utc>,
}

// ── TimerQueue ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Tracked {
    last_changed: DateTime<Utc>,
    /// Generation of the live heap entry, if armed.
    armed: Option<u64>,
}

type HeapEntry = Reverse<(DateTime<Utc>, u64, String)>;

/// Priority queue of per-id fire times with lazy cancellation.
#[derive(Debug, Default)]
pub struct TimerQueue {
    config: SchedulerConfig,
    items: HashMap<String, Tracked>,
    heap: BinaryHeap<HeapEntry>,
    generation: u64,
    paused: bool,
}

impl TimerQueue {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Track `id`, replacing any previous registration.
    pub fn register(&mut self, id: &str, last_changed: DateTime<Utc>, now: DateTime<Utc>) {
        self.items.insert(
            id.to_owned(),
            Tracked {
                last_changed,
                armed: None,
            },
        );
        if !self.paused {
            self.arm(id, now);
        }
    }

    /// Re-time `id`. Registers it when unknown.
    pub fn update(&mut self, id: &str, last_changed: DateTime<Utc>, now: DateTime<Utc>) {
        match self.items.get_mut(id) {
            Some(item) => {
                item.last_changed = last_changed;
                item.armed = None;
                if !self.paused {
                    self.arm(id, now);
                }
            }
            None => self.register(id, last_changed, now),
        }
    }

    /// Cancel and forget `id`.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.items.remove(id).is_some()
    }

    /// Cancel every armed timer; registrations are kept.
    pub fn pause(&mut self) {
        self.paused = true;
        self.heap.clear();
        for item in self.items.values_mut() {
            item.armed = None;
        }
    }

    /// Re-arm every registration from its stored timestamp.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.paused = false;
        let ids: Vec<String> = self.items.keys().cloned().collect();
        for id in ids {
            self.arm(&id, now);
        }
    }

    /// Forget everything, including a pause.
    pub fn clear(&mut self) {
        self.items.clear();
        self.heap.clear();
        self.paused = false;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.items.get(id).is_some_and(|i| i.armed.is_some())
    }

    /// Earliest live fire time.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse((deadline, generation, id))) = self.heap.peek() {
            if self.is_live(id, *generation) {
                return Some(*deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every live entry due at `now`, re-arming each for its next boundary.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Tick> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, _, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((_, generation, id))) = self.heap.pop() else {
                break;
            };
            if !self.is_live(&id, generation) {
                continue;
            }
            if let Some(item) = self.items.get(&id) {
                due.push(Tick {
                    id: id.clone(),
                    last_changed: item.last_changed,
                });
            }
            self.arm(&id, now);
        }
        due
    }

    fn is_live(&self, id: &str, generation: u64) -> bool {
        self.items.get(id).and_then(|i| i.armed) == Some(generation)
    }

    fn arm(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        self.generation += 1;
        item.armed = Some(self.generation);

        let delay = self.config.delay_for(now, item.last_changed);
        let deadline = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.heap.push(Reverse((deadline, self.generation, id.to_owned())));

        // Stale entries pile up when ids are re-timed faster than they fire.
        if self.heap.len() > 2 * self.items.len() + 16 {
            self.compact();
        }
    }

    fn compact(&mut self) {
        let items = &self.items;
        self.heap
            .retain(|Reverse((_, generation, id))| items.get(id).and_then(|i| i.armed) == Some(*generation));
    }
}

// ── Async driver ─────────────────────────────────────────────────────

enum SchedulerCommand {
    Register { id: String, last_changed: DateTime<Utc> },
    Update { id: String, last_changed: DateTime<Utc> },
    Unregister(String),
    Pause,
    Resume,
    Clear,
    Size(oneshot::Sender<usize>),
}

/// Handle to a running scheduler task.
///
/// Commands are applied in order. Ticks arrive on the receiver returned
/// by [`spawn`](Self::spawn); the task ends when the handle is dropped,
/// [`destroy`](Self::destroy) is called, or the tick receiver is gone.
#[derive(Clone)]
pub struct RelativeTimeScheduler {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    cancel: CancellationToken,
}

impl RelativeTimeScheduler {
    pub fn spawn(
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        tokio::spawn(scheduler_task(TimerQueue::new(config), rx, tick_tx, cancel.clone()));
        (Self { tx, cancel }, tick_rx)
    }

    fn post(&self, command: SchedulerCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("scheduler task gone, command dropped");
        }
    }

    pub fn register(&self, id: impl Into<String>, last_changed: DateTime<Utc>) {
        self.post(SchedulerCommand::Register {
            id: id.into(),
            last_changed,
        });
    }

    pub fn update(&self, id: impl Into<String>, last_changed: DateTime<Utc>) {
        self.post(SchedulerCommand::Update {
            id: id.into(),
            last_changed,
        });
    }

    pub fn unregister(&self, id: impl Into<String>) {
        self.post(SchedulerCommand::Unregister(id.into()));
    }

    pub fn pause(&self) {
        self.post(SchedulerCommand::Pause);
    }

    pub fn resume(&self) {
        self.post(SchedulerCommand::Resume);
    }

    pub fn clear(&self) {
        self.post(SchedulerCommand::Clear);
    }

    /// Number of tracked ids, or 0 once the task has stopped.
    pub async fn size(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.post(SchedulerCommand::Size(tx));
        rx.await.unwrap_or(0)
    }

    /// Forget everything and stop the task.
    pub fn destroy(&self) {
        self.clear();
        self.cancel.cancel();
    }
}

async fn scheduler_task(
    mut queue: TimerQueue,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    ticks: mpsc::UnboundedSender<Tick>,
    cancel: CancellationToken,
) {
    loop {
        for tick in queue.pop_due(Utc::now()) {
            if ticks.send(tick).is_err() {
                tracing::debug!("tick receiver gone, scheduler exiting");
                return;
            }
        }

        let wait = queue
            .next_deadline()
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO));

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                let now = Utc::now();
                match command {
                    SchedulerCommand::Register { id, last_changed } => {
                        queue.register(&id, last_changed, now);
                    }
                    SchedulerCommand::Update { id, last_changed } => {
                        queue.update(&id, last_changed, now);
                    }
                    SchedulerCommand::Unregister(id) => {
                        queue.unregister(&id);
                    }
                    SchedulerCommand::Pause => queue.pause(),
                    SchedulerCommand::Resume => queue.resume(now),
                    SchedulerCommand::Clear => queue.clear(),
                    SchedulerCommand::Size(reply) => {
                        let _ = reply.send(queue.len());
                    }
                }
            }
            () = sleep_or_pending(wait) => {}
        }
    }
    tracing::debug!("scheduler task exiting");
}

async fn sleep_or_pending(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}
