// ── Snapshot cache ──
//
// Persists the state list, registries, and pipelines for cold start.
// One JSON blob per dataset plus a timestamp written last as the commit
// marker: no timestamp means no cache, whatever else is on disk. Every
// failure is logged and reported as "cache unavailable", never raised.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::model::{Area, Device, EntityEntry, EntityState, Floor, Label, PipelineList, Snapshot};
use crate::store::{StateSnapshot, SyncContext};

// ── Keys ─────────────────────────────────────────────────────────────

/// Persisted datasets. Renaming a key is the only way to change a blob's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CacheKey {
    States,
    Areas,
    Floors,
    Devices,
    Entities,
    Labels,
    Pipelines,
    Timestamp,
}

impl CacheKey {
    /// Content keys, in write order. The timestamp is not included.
    pub const DATASETS: [CacheKey; 7] = [
        CacheKey::States,
        CacheKey::Areas,
        CacheKey::Floors,
        CacheKey::Devices,
        CacheKey::Entities,
        CacheKey::Labels,
        CacheKey::Pipelines,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheKey::States => "ha_startup_cache_states",
            CacheKey::Areas => "ha_startup_cache_areas",
            CacheKey::Floors => "ha_startup_cache_floors",
            CacheKey::Devices => "ha_startup_cache_devices",
            CacheKey::Entities => "ha_startup_cache_entities",
            CacheKey::Labels => "ha_startup_cache_labels",
            CacheKey::Pipelines => "ha_startup_cache_pipelines",
            CacheKey::Timestamp => "ha_startup_cache_timestamp",
        }
    }
}

// ── Storage backends ─────────────────────────────────────────────────

/// String key/value storage for cache blobs.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ── SnapshotCache ────────────────────────────────────────────────────

/// What a stored cache contains, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    pub saved_at: DateTime<Utc>,
    /// Present datasets with their blob sizes in bytes.
    pub datasets: Vec<(CacheKey, usize)>,
}

/// Decoded blobs, installed only once all of them parsed.
#[derive(Default)]
struct Restored {
    states: Option<Vec<EntityState>>,
    areas: Option<Snapshot<Area>>,
    floors: Option<Snapshot<Floor>>,
    devices: Option<Snapshot<Device>>,
    entities: Option<Snapshot<EntityEntry>>,
    labels: Option<Snapshot<Label>>,
    pipelines: Option<PipelineList>,
}

pub struct SnapshotCache {
    store: Box<dyn SnapshotStore>,
}

impl SnapshotCache {
    pub fn new(store: impl SnapshotStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Persist every dataset currently held by `ctx`.
    ///
    /// Returns `false` (after logging) if any write failed; the timestamp
    /// is then absent and the partial set reads as no cache.
    pub fn save(&self, ctx: &SyncContext) -> bool {
        match self.try_save(ctx) {
            Ok(written) => {
                tracing::debug!(datasets = written, "snapshot cache saved");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save snapshot cache");
                false
            }
        }
    }

    fn try_save(&self, ctx: &SyncContext) -> io::Result<usize> {
        // Invalidate first so a crash mid-save cannot pair old and new blobs.
        self.store.remove(CacheKey::Timestamp.as_str())?;

        let written = [
            self.put_or_remove(CacheKey::States, ctx.states().as_deref().map(StateSnapshot::list))?,
            self.put_or_remove(CacheKey::Areas, ctx.areas().as_deref())?,
            self.put_or_remove(CacheKey::Floors, ctx.floors().as_deref())?,
            self.put_or_remove(CacheKey::Devices, ctx.devices().as_deref())?,
            self.put_or_remove(CacheKey::Entities, ctx.entities().as_deref())?,
            self.put_or_remove(CacheKey::Labels, ctx.labels().as_deref())?,
            self.put_or_remove(CacheKey::Pipelines, ctx.pipelines().as_deref())?,
        ]
        .into_iter()
        .filter(|&w| w)
        .count();

        let stamp = Utc::now().timestamp_millis().to_string();
        self.store.set(CacheKey::Timestamp.as_str(), &stamp)?;
        Ok(written)
    }

    /// Write `value` under `key`, or drop a blob left by an earlier save.
    fn put_or_remove<T: Serialize + ?Sized>(&self, key: CacheKey, value: Option<&T>) -> io::Result<bool> {
        let Some(value) = value else {
            self.store.remove(key.as_str())?;
            return Ok(false);
        };
        let json = serde_json::to_string(value).map_err(io::Error::other)?;
        self.store.set(key.as_str(), &json)?;
        Ok(true)
    }

    /// Restore cached datasets into `ctx`.
    ///
    /// Returns `false` when no committed cache exists or any blob fails to
    /// decode; in that case `ctx` is left untouched. Absent blobs are
    /// skipped.
    pub fn load(&self, ctx: &SyncContext) -> bool {
        let saved_at = match self.saved_at_checked() {
            Ok(Some(saved_at)) => saved_at,
            Ok(None) => {
                tracing::debug!("no snapshot cache found");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot cache unreadable");
                return false;
            }
        };

        let restored = match self.read_all() {
            Ok(restored) => restored,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot cache unreadable");
                return false;
            }
        };

        if let Some(areas) = restored.areas {
            ctx.set_areas(areas);
        }
        if let Some(floors) = restored.floors {
            ctx.set_floors(floors);
        }
        if let Some(devices) = restored.devices {
            ctx.set_devices(devices);
        }
        if let Some(entities) = restored.entities {
            ctx.set_entities(entities);
        }
        if let Some(labels) = restored.labels {
            ctx.set_labels(labels);
        }
        if let Some(pipelines) = restored.pipelines {
            ctx.set_pipelines(pipelines);
        }
        if let Some(states) = restored.states {
            ctx.install_states(states, Instant::now());
        }

        let age = Utc::now().signed_duration_since(saved_at);
        tracing::info!(age_secs = age.num_seconds(), "snapshot cache loaded");
        true
    }

    fn read_all(&self) -> io::Result<Restored> {
        Ok(Restored {
            states: self.take(CacheKey::States)?,
            areas: self.take(CacheKey::Areas)?,
            floors: self.take(CacheKey::Floors)?,
            devices: self.take(CacheKey::Devices)?,
            entities: self.take(CacheKey::Entities)?,
            labels: self.take(CacheKey::Labels)?,
            pipelines: self.take(CacheKey::Pipelines)?,
        })
    }

    fn take<T: DeserializeOwned>(&self, key: CacheKey) -> io::Result<Option<T>> {
        let Some(raw) = self.store.get(key.as_str())? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", key.as_str())))
    }

    fn saved_at_checked(&self) -> io::Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(CacheKey::Timestamp.as_str())? else {
            return Ok(None);
        };
        let millis: i64 = raw
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("timestamp: {e}")))?;
        Ok(DateTime::from_timestamp_millis(millis))
    }

    /// When the committed cache was written, if one exists.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.saved_at_checked().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "snapshot cache unreadable");
            None
        })
    }

    /// Describe the committed cache without installing it.
    pub fn summary(&self) -> Option<CacheSummary> {
        let saved_at = self.saved_at()?;
        let datasets = CacheKey::DATASETS
            .iter()
            .filter_map(|&key| match self.store.get(key.as_str()) {
                Ok(Some(raw)) => Some((key, raw.len())),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(key = key.as_str(), error = %e, "cache blob unreadable");
                    None
                }
            })
            .collect();
        Some(CacheSummary { saved_at, datasets })
    }

    /// Remove every dataset and the timestamp.
    pub fn clear(&self) {
        for key in CacheKey::DATASETS.iter().chain([&CacheKey::Timestamp]) {
            if let Err(e) = self.store.remove(key.as_str()) {
                tracing::warn!(key = key.as_str(), error = %e, "failed to remove cache blob");
            }
        }
        tracing::debug!("snapshot cache cleared");
    }
}
