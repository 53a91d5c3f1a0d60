// ── Registry records ──
//
// Structural catalogs maintained by the server. Each snapshot maps a
// record's own id to the record and keeps server declaration order.
// Foreign keys: device → area, entity → device / area, area → floor,
// entity → labels. Empty-string area and floor ids deserialize as `None`.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// A registry snapshot: id → record, in declaration order.
pub type Snapshot<T> = IndexMap<String, T>;

/// A record that can be keyed in a [`Snapshot`].
pub trait RegistryRecord {
    fn id(&self) -> &str;
}

/// Key a server list by record id. Later duplicates replace earlier ones
/// but keep the first position.
pub fn index_by_id<T: RegistryRecord>(records: Vec<T>) -> Snapshot<T> {
    let mut snapshot = IndexMap::with_capacity(records.len());
    for record in records {
        snapshot.insert(record.id().to_owned(), record);
    }
    snapshot
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Area ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub floor_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<String>,
    /// Explicit manual ordering, when the server provides one.
    #[serde(default, alias = "sortOrder", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl RegistryRecord for Area {
    fn id(&self) -> &str {
        &self.area_id
    }
}

// ── Floor ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Floor {
    pub floor_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<String>,
    #[serde(default, alias = "sortOrder", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl RegistryRecord for Floor {
    fn id(&self) -> &str {
        &self.floor_id
    }
}

// ── Device ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_by_user: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub area_id: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
}

impl Device {
    /// User-assigned name first, then the integration's name.
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

impl RegistryRecord for Device {
    fn id(&self) -> &str {
        &self.id
    }
}

// ── Entity registry entry ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub entity_id: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub device_id: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub area_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
    #[serde(default)]
    pub hidden_by: Option<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
}

impl EntityEntry {
    pub fn is_hidden(&self) -> bool {
        self.hidden_by.is_some() || self.disabled_by.is_some()
    }
}

impl RegistryRecord for EntityEntry {
    fn id(&self) -> &str {
        &self.entity_id
    }
}

// ── Label ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub label_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RegistryRecord for Label {
    fn id(&self) -> &str {
        &self.label_id
    }
}
