//! Synchronization engine between `hasync-api` and its consumers (CLI).
//!
//! - **[`Controller`]**: connection orchestrator. Refuses to connect
//!   without a URL and token, runs the initial sync after `auth_ok`,
//!   preserves consumer contexts across a disconnect, and performs the
//!   full teardown on [`restart()`](Controller::restart).
//!
//! - **[`SyncContext`]**: every synchronized snapshot (states, registries,
//!   pipelines, favorites), each swapped atomically. Hosts the TTL-gated
//!   state fetch and diff application.
//!
//! - **[`RegistryIndex`]**: relational queries over the registry
//!   snapshots. Entity queries fail closed with [`NotReady`] until the
//!   area, device, and entity registries are loaded.
//!
//! - **[`SnapshotCache`]**: cold-start persistence with a timestamp
//!   commit marker. Failures degrade to "no cache".
//!
//! - **[`RelativeTimeScheduler`]**: fires once per tracked timestamp each
//!   time its humanized age would change.

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod favorites;
pub mod grouping;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{CacheKey, CacheSummary, FileStore, MemoryStore, SnapshotCache, SnapshotStore};
pub use config::{DomainMenu, GroupingThresholds, SyncConfig};
pub use controller::{ConnectionState, Controller, SyncPhase};
pub use error::CoreError;
pub use favorites::{Favorite, Favorites};
pub use scheduler::humanize::human_diff;
pub use scheduler::{RelativeTimeScheduler, SchedulerConfig, Tick};
pub use store::{NotReady, RegistryIndex, StateSnapshot, SyncContext};
pub use stream::EntityStream;
pub use transport::Transport;

pub use model::{
    Area, Device, EntityDiff, EntityEntry, EntityState, Floor, Label, Pipeline, PipelineList,
};
