// ── Registry index ──
//
// Read-only relational queries over the registry snapshots. Nothing is
// cached between calls; every query scans the snapshots it was built
// from. Entity queries fail closed with `NotReady` until the area,
// device, and entity registries are all loaded.

use std::cmp::Reverse;
use std::sync::Arc;

use super::context::SyncContext;
use crate::model::{Area, Device, EntityEntry, Floor, Label, Snapshot};

/// The area, device, or entity registry has not been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("registries are not loaded yet")]
pub struct NotReady;

/// A consistent view over the registry snapshots at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistryIndex {
    areas: Option<Arc<Snapshot<Area>>>,
    floors: Option<Arc<Snapshot<Floor>>>,
    devices: Option<Arc<Snapshot<Device>>>,
    entities: Option<Arc<Snapshot<EntityEntry>>>,
    labels: Option<Arc<Snapshot<Label>>>,
}

impl SyncContext {
    /// Capture the current registry snapshots for querying.
    pub fn registry(&self) -> RegistryIndex {
        RegistryIndex {
            areas: self.areas(),
            floors: self.floors(),
            devices: self.devices(),
            entities: self.entities(),
            labels: self.labels(),
        }
    }
}

fn normalize(id: Option<&str>) -> Option<&str> {
    id.filter(|s| !s.is_empty())
}

impl RegistryIndex {
    pub fn is_ready(&self) -> bool {
        self.areas.is_some() && self.devices.is_some() && self.entities.is_some()
    }

    fn entities_checked(&self) -> Result<&Snapshot<EntityEntry>, NotReady> {
        match (&self.areas, &self.devices, &self.entities) {
            (Some(_), Some(_), Some(entities)) => Ok(entities),
            _ => Err(NotReady),
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn area(&self, area_id: &str) -> Option<&Area> {
        self.areas.as_ref()?.get(area_id)
    }

    pub fn floor(&self, floor_id: &str) -> Option<&Floor> {
        self.floors.as_ref()?.get(floor_id)
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.as_ref()?.get(device_id)
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityEntry> {
        self.entities.as_ref()?.get(entity_id)
    }

    pub fn label(&self, label_id: &str) -> Option<&Label> {
        self.labels.as_ref()?.get(label_id)
    }

    /// The entity's own area, else its device's area, else none.
    pub fn effective_area<'a>(&'a self, entry: &'a EntityEntry) -> Option<&'a str> {
        if let Some(area) = normalize(entry.area_id.as_deref()) {
            return Some(area);
        }
        let device = self.device(entry.device_id.as_deref()?)?;
        normalize(device.area_id.as_deref())
    }

    // ── Relational queries ───────────────────────────────────────────

    /// Entities whose effective area is `area_id`. `None` (or an empty
    /// id) selects entities with no effective area.
    ///
    /// Registry declaration order.
    pub fn entities_for_area(&self, area_id: Option<&str>) -> Result<Vec<&EntityEntry>, NotReady> {
        let entities = self.entities_checked()?;
        let wanted = normalize(area_id);
        Ok(entities
            .values()
            .filter(|e| self.effective_area(e) == wanted)
            .collect())
    }

    /// Areas on `floor_id`. `None` selects areas without a floor.
    pub fn areas_for_floor(&self, floor_id: Option<&str>) -> Result<Vec<&Area>, NotReady> {
        let areas = self.areas.as_ref().ok_or(NotReady)?;
        let wanted = normalize(floor_id);
        Ok(areas
            .values()
            .filter(|a| normalize(a.floor_id.as_deref()) == wanted)
            .collect())
    }

    /// Entities whose effective area lies on `floor_id`.
    /// `None` selects entities in areas without a floor.
    pub fn entities_for_floor(&self, floor_id: Option<&str>) -> Result<Vec<&EntityEntry>, NotReady> {
        let entities = self.entities_checked()?;
        let wanted = normalize(floor_id);
        Ok(entities
            .values()
            .filter(|e| {
                self.effective_area(e)
                    .and_then(|area| self.area(area))
                    .is_some_and(|area| normalize(area.floor_id.as_deref()) == wanted)
            })
            .collect())
    }

    /// Entities carrying `label_id`.
    pub fn entities_for_label(&self, label_id: &str) -> Result<Vec<&EntityEntry>, NotReady> {
        let entities = self.entities_checked()?;
        Ok(entities
            .values()
            .filter(|e| e.labels.iter().any(|l| l == label_id))
            .collect())
    }

    // ── Sorted listings ──────────────────────────────────────────────

    /// Explicit sort order first, then case-insensitive name, then id.
    pub fn all_areas(&self) -> Vec<&Area> {
        let mut areas: Vec<&Area> = self.areas.iter().flat_map(|s| s.values()).collect();
        areas.sort_by_cached_key(|a| {
            (
                Reverse(a.sort_order.is_some()),
                a.sort_order,
                sort_name(&a.name, &a.area_id),
                a.area_id.clone(),
            )
        });
        areas
    }

    /// Explicit sort order first, then level, then case-insensitive name, then id.
    pub fn all_floors(&self) -> Vec<&Floor> {
        let mut floors: Vec<&Floor> = self.floors.iter().flat_map(|s| s.values()).collect();
        floors.sort_by_cached_key(|f| {
            (
                Reverse(f.sort_order.is_some()),
                f.sort_order,
                Reverse(f.level.is_some()),
                f.level,
                sort_name(&f.name, &f.floor_id),
                f.floor_id.clone(),
            )
        });
        floors
    }

    /// Case-insensitive name, then id.
    pub fn all_labels(&self) -> Vec<&Label> {
        let mut labels: Vec<&Label> = self.labels.iter().flat_map(|s| s.values()).collect();
        labels.sort_by_cached_key(|l| (sort_name(&l.name, &l.label_id), l.label_id.clone()));
        labels
    }

    pub fn has_floors(&self) -> bool {
        self.floors.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn has_areas_with_floors(&self) -> bool {
        self.areas
            .iter()
            .flat_map(|s| s.values())
            .any(|a| normalize(a.floor_id.as_deref()).is_some())
    }
}

fn sort_name(name: &str, id: &str) -> String {
    let shown = if name.is_empty() { id } else { name };
    shown.to_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::index_by_id;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn snapshot<T: serde::de::DeserializeOwned + crate::model::RegistryRecord>(
        value: Value,
    ) -> Snapshot<T> {
        index_by_id(serde_json::from_value::<Vec<T>>(value).unwrap())
    }

    fn loaded() -> SyncContext {
        let ctx = SyncContext::default();
        ctx.set_floors(snapshot(json!([
            { "floor_id": "upstairs", "name": "Upstairs", "level": 1 },
            { "floor_id": "ground", "name": "Ground", "level": 0 }
        ])));
        ctx.set_areas(snapshot(json!([
            { "area_id": "kitchen", "name": "kitchen", "floor_id": "ground" },
            { "area_id": "bedroom", "name": "Bedroom", "floor_id": "upstairs" },
            { "area_id": "garage", "name": "Garage", "floor_id": null }
        ])));
        ctx.set_devices(snapshot(json!([
            { "id": "dev_kitchen", "name": "Hub", "area_id": "kitchen" },
            { "id": "dev_loose", "name": "Plug", "area_id": null }
        ])));
        ctx.set_entities(snapshot(json!([
            { "entity_id": "light.kitchen", "device_id": "dev_kitchen", "area_id": null },
            { "entity_id": "light.moved", "device_id": "dev_kitchen", "area_id": "bedroom",
              "labels": ["night"] },
            { "entity_id": "switch.plug", "device_id": "dev_loose", "area_id": null },
            { "entity_id": "sensor.cloud", "device_id": null, "area_id": "" ,
              "labels": ["night", "cloud"] },
            { "entity_id": "light.garage", "area_id": "garage" }
        ])));
        ctx.set_labels(snapshot(json!([
            { "label_id": "night", "name": "night" },
            { "label_id": "cloud", "name": "Cloud" }
        ])));
        ctx
    }

    fn ids<'a>(entries: &[&'a EntityEntry]) -> Vec<&'a str> {
        entries.iter().map(|e| e.entity_id.as_str()).collect()
    }

    #[test]
    fn own_area_wins_over_device_area() {
        let ctx = loaded();
        let reg = ctx.registry();
        assert_eq!(
            ids(&reg.entities_for_area(Some("kitchen")).unwrap()),
            ["light.kitchen"]
        );
        assert_eq!(
            ids(&reg.entities_for_area(Some("bedroom")).unwrap()),
            ["light.moved"]
        );
    }

    #[test]
    fn no_area_is_disjoint_from_every_area() {
        let ctx = loaded();
        let reg = ctx.registry();
        let none = ids(&reg.entities_for_area(None).unwrap());
        assert_eq!(none, ["switch.plug", "sensor.cloud"]);
        assert_eq!(ids(&reg.entities_for_area(Some("")).unwrap()), none);

        for area in reg.all_areas() {
            let members = ids(&reg.entities_for_area(Some(&area.area_id)).unwrap());
            assert!(members.iter().all(|m| !none.contains(m)));
        }
    }

    #[test]
    fn queries_fail_closed_until_loaded() {
        let ctx = SyncContext::default();
        ctx.set_areas(snapshot(json!([])));
        ctx.set_entities(snapshot(json!([])));
        let reg = ctx.registry();

        assert!(!reg.is_ready());
        assert_eq!(reg.entities_for_area(None), Err(NotReady));
        assert_eq!(reg.entities_for_label("x"), Err(NotReady));
        assert_eq!(reg.entities_for_floor(None), Err(NotReady));
    }

    #[test]
    fn areas_for_floor_needs_only_the_area_registry() {
        let ctx = SyncContext::default();
        assert_eq!(ctx.registry().areas_for_floor(None), Err(NotReady));

        ctx.set_areas(snapshot(json!([
            { "area_id": "den", "name": "Den", "floor_id": null }
        ])));
        let reg = ctx.registry();

        assert!(!reg.is_ready());
        let ids: Vec<&str> = reg
            .areas_for_floor(None)
            .unwrap()
            .iter()
            .map(|a| a.area_id.as_str())
            .collect();
        assert_eq!(ids, ["den"]);
    }

    #[test]
    fn empty_but_loaded_is_not_an_error() {
        let ctx = SyncContext::default();
        ctx.set_areas(snapshot(json!([])));
        ctx.set_devices(snapshot(json!([])));
        ctx.set_entities(snapshot(json!([])));
        assert_eq!(ctx.registry().entities_for_label("x"), Ok(vec![]));
    }

    #[test]
    fn floors_sort_by_level_and_unassigned_areas_are_found() {
        let ctx = loaded();
        let reg = ctx.registry();

        let floors: Vec<&str> = reg.all_floors().iter().map(|f| f.floor_id.as_str()).collect();
        assert_eq!(floors, ["ground", "upstairs"]);

        let arealess: Vec<&str> = reg
            .areas_for_floor(None)
            .unwrap()
            .iter()
            .map(|a| a.area_id.as_str())
            .collect();
        assert_eq!(arealess, ["garage"]);
        assert!(reg.has_floors());
        assert!(reg.has_areas_with_floors());
    }

    #[test]
    fn entities_for_floor_follow_effective_area() {
        let ctx = loaded();
        let reg = ctx.registry();
        assert_eq!(
            ids(&reg.entities_for_floor(Some("upstairs")).unwrap()),
            ["light.moved"]
        );
        assert_eq!(ids(&reg.entities_for_floor(None).unwrap()), ["light.garage"]);
    }

    #[test]
    fn label_membership_keeps_registry_order() {
        let ctx = loaded();
        let reg = ctx.registry();
        assert_eq!(
            ids(&reg.entities_for_label("night").unwrap()),
            ["light.moved", "sensor.cloud"]
        );
    }

    #[test]
    fn listings_sort_case_insensitively_with_explicit_order_first() {
        let ctx = loaded();
        ctx.set_areas(snapshot(json!([
            { "area_id": "b", "name": "beta" },
            { "area_id": "a", "name": "Alpha" },
            { "area_id": "z", "name": "zulu", "sort_order": 0 },
            { "area_id": "c", "name": "alpha" }
        ])));
        let reg = ctx.registry();

        let areas: Vec<&str> = reg.all_areas().iter().map(|a| a.area_id.as_str()).collect();
        assert_eq!(areas, ["z", "a", "c", "b"]);

        let labels: Vec<&str> = reg.all_labels().iter().map(|l| l.label_id.as_str()).collect();
        assert_eq!(labels, ["cloud", "night"]);
    }

    #[test]
    fn missing_snapshots_list_nothing() {
        let reg = RegistryIndex::default();
        assert!(reg.all_areas().is_empty());
        assert!(reg.all_floors().is_empty());
        assert!(!reg.has_floors());
        assert!(!reg.has_areas_with_floors());
    }
}
