// ── Entity state ──

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Latest known state of one entity, as returned by `get_states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityState {
    /// The part of the id before the first dot (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    /// Friendly name, falling back to the entity id.
    pub fn display_name(&self) -> &str {
        self.friendly_name().unwrap_or(&self.entity_id)
    }
}

/// Domain part of an entity id.
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(domain, _)| domain)
}

// ── Compressed subscription diffs ───────────────────────────────────
//
// `subscribe_entities` streams `{a, c, r}` payloads: full states for
// added entities, `+`/`-` patches for changed ones, ids for removed ones.
// Timestamps are epoch seconds with a fractional part.

/// One `subscribe_entities` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityDiff {
    #[serde(default, rename = "a")]
    pub added: IndexMap<String, CompressedState>,
    #[serde(default, rename = "c")]
    pub changed: IndexMap<String, CompressedChange>,
    #[serde(default, rename = "r")]
    pub removed: Vec<String>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Full state in compressed form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompressedState {
    #[serde(default, rename = "s")]
    pub state: String,
    #[serde(default, rename = "a")]
    pub attributes: Map<String, Value>,
    #[serde(default, rename = "lc")]
    pub last_changed: Option<f64>,
    #[serde(default, rename = "lu")]
    pub last_updated: Option<f64>,
}

impl CompressedState {
    pub fn into_state(self, entity_id: String) -> EntityState {
        let last_changed = self.last_changed.and_then(from_epoch_secs);
        let last_updated = self.last_updated.and_then(from_epoch_secs).or(last_changed);
        EntityState {
            entity_id,
            state: self.state,
            attributes: self.attributes,
            last_changed,
            last_updated,
        }
    }
}

/// Patch for an existing entity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompressedChange {
    #[serde(default, rename = "+")]
    pub set: Option<PartialState>,
    #[serde(default, rename = "-")]
    pub unset: Option<RemovedAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialState {
    #[serde(default, rename = "s")]
    pub state: Option<String>,
    #[serde(default, rename = "a")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, rename = "lc")]
    pub last_changed: Option<f64>,
    #[serde(default, rename = "lu")]
    pub last_updated: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemovedAttributes {
    #[serde(default, rename = "a")]
    pub attributes: Vec<String>,
}

impl CompressedChange {
    /// Apply this patch in place.
    pub fn apply(&self, target: &mut EntityState) {
        if let Some(set) = &self.set {
            if let Some(state) = &set.state {
                target.state.clone_from(state);
            }
            if let Some(attributes) = &set.attributes {
                for (key, value) in attributes {
                    target.attributes.insert(key.clone(), value.clone());
                }
            }
            if let Some(lc) = set.last_changed.and_then(from_epoch_secs) {
                target.last_changed = Some(lc);
                target.last_updated = Some(lc);
            }
            if let Some(lu) = set.last_updated.and_then(from_epoch_secs) {
                target.last_updated = Some(lu);
            }
        }
        if let Some(unset) = &self.unset {
            for key in &unset.attributes {
                target.attributes.remove(key);
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_get_states_item() {
        let state: EntityState = serde_json::from_value(json!({
            "entity_id": "sensor.outside_temp",
            "state": "12.5",
            "attributes": { "friendly_name": "Outside", "unit_of_measurement": "°C" },
            "last_changed": "2025-01-01T12:00:00.123456+00:00",
            "last_updated": "2025-01-01T12:00:00.123456+00:00",
            "context": { "id": "01J", "parent_id": null, "user_id": null }
        }))
        .unwrap();

        assert_eq!(state.domain(), "sensor");
        assert_eq!(state.display_name(), "Outside");
        assert_eq!(
            state.last_changed.unwrap().to_rfc3339(),
            "2025-01-01T12:00:00.123456+00:00"
        );
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let state: EntityState =
            serde_json::from_value(json!({ "entity_id": "light.attic", "state": "off" })).unwrap();
        assert_eq!(state.display_name(), "light.attic");
        assert!(state.last_changed.is_none());
    }

    #[test]
    fn compressed_add_and_patch() {
        let diff: EntityDiff = serde_json::from_value(json!({
            "a": {
                "light.kitchen": {
                    "s": "on",
                    "a": { "brightness": 200, "friendly_name": "Kitchen" },
                    "c": "01J",
                    "lc": 1_735_732_800.5
                }
            }
        }))
        .unwrap();
        let (id, added) = diff.added.into_iter().next().unwrap();
        let mut state = added.into_state(id);
        assert_eq!(state.state, "on");
        assert_eq!(state.last_updated, state.last_changed);

        let patch: CompressedChange = serde_json::from_value(json!({
            "+": { "s": "off", "a": { "color_mode": null }, "lc": 1_735_732_900.0 },
            "-": { "a": ["brightness"] }
        }))
        .unwrap();
        patch.apply(&mut state);

        assert_eq!(state.state, "off");
        assert!(!state.attributes.contains_key("brightness"));
        assert!(state.attributes.contains_key("color_mode"));
        assert_eq!(state.friendly_name(), Some("Kitchen"));
        assert_eq!(state.last_changed.unwrap().timestamp(), 1_735_732_900);
    }

    #[test]
    fn domain_of_without_dot() {
        assert_eq!(domain_of("weird"), "weird");
        assert_eq!(domain_of("switch.a.b"), "switch");
    }
}
