// ── Synchronized data store ──
//
// `SyncContext` owns every snapshot the engine keeps; the sibling
// modules add the operations that fill and query it.

mod context;
mod refresh;
mod registry;
mod states;

pub use context::{StateSnapshot, SyncContext};
pub use registry::{NotReady, RegistryIndex};
