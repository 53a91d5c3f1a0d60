//! Favorites handler.

use chrono::Utc;
use tabled::Tabled;

use hasync_core::{Controller, Favorite, human_diff};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct FavoriteRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Changed")]
    changed: String,
}

pub async fn handle(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    super::sync(controller, global).await?;

    let favorites: Vec<Favorite> = controller.context().favorites().entries().to_vec();
    let states = controller.context().states();
    let now = Utc::now();
    let color = output::should_color(&global.color);

    let out = output::render_list(
        &global.output,
        &favorites,
        |fav| {
            let state = states.as_deref().and_then(|s| s.get(&fav.entity_id));
            FavoriteRow {
                entity_id: fav.entity_id.clone(),
                name: fav.name.clone().unwrap_or_default(),
                state: state.map_or_else(
                    || "unavailable".into(),
                    |s| output::paint_state(&s.state, color),
                ),
                changed: state
                    .and_then(|s| s.last_changed)
                    .map(|t| human_diff(now, t))
                    .unwrap_or_default(),
            }
        },
        |fav| fav.entity_id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
