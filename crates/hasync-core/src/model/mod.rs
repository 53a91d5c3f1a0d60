// ── Domain model ──
//
// Canonical types for the synchronized view: live entity states, the
// five registries, and assist pipelines. Everything here is plain data
// with serde derives; the stores and the snapshot cache own the logic.

pub mod entity_state;
pub mod pipeline;
pub mod registry;

// ── Re-exports ──────────────────────────────────────────────────────

pub use entity_state::{CompressedChange, CompressedState, EntityDiff, EntityState};
pub use pipeline::{Pipeline, PipelineList};
pub use registry::{Area, Device, EntityEntry, Floor, Label, RegistryRecord, Snapshot, index_by_id};
