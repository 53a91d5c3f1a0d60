// ── Favorites ──
//
// An ordered list of favorite entities with cached display names.
// Names are refreshed from `friendly_name` after every full state
// refresh or cache restore so listings work before states arrive.

use serde::{Deserialize, Serialize};

use crate::model::EntityState;
use crate::store::StateSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FavoriteRepr")]
pub struct Favorite {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Accepts both the bare-id form and the `{entity_id, name}` form.
#[derive(Deserialize)]
#[serde(untagged)]
enum FavoriteRepr {
    Id(String),
    Full {
        entity_id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl From<FavoriteRepr> for Favorite {
    fn from(repr: FavoriteRepr) -> Self {
        match repr {
            FavoriteRepr::Id(entity_id) => Self {
                entity_id,
                name: None,
            },
            FavoriteRepr::Full { entity_id, name } => Self { entity_id, name },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Favorites {
    entries: Vec<Favorite>,
}

impl Favorites {
    pub fn new(entries: Vec<Favorite>) -> Self {
        let mut favorites = Self::default();
        for fav in entries {
            favorites.add(fav.entity_id, fav.name);
        }
        favorites
    }

    /// Append unless already present.
    pub fn add(&mut self, entity_id: String, name: Option<String>) -> bool {
        if self.contains(&entity_id) {
            return false;
        }
        self.entries.push(Favorite { entity_id, name });
        true
    }

    pub fn remove(&mut self, entity_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|f| f.entity_id != entity_id);
        self.entries.len() != before
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entries.iter().any(|f| f.entity_id == entity_id)
    }

    pub fn entries(&self) -> &[Favorite] {
        &self.entries
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entries.iter().map(|f| f.entity_id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy current friendly names into the cached entries.
    ///
    /// Returns `true` if any name changed.
    pub fn update_friendly_names(&mut self, states: &StateSnapshot) -> bool {
        let mut updated = false;
        for fav in &mut self.entries {
            let Some(name) = states.get(&fav.entity_id).and_then(EntityState::friendly_name) else {
                continue;
            };
            if fav.name.as_deref() != Some(name) {
                fav.name = Some(name.to_owned());
                updated = true;
            }
        }
        updated
    }
}
