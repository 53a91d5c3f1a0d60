//! Area, floor, label, device, and pipeline handlers.

use serde::Serialize;
use tabled::Tabled;

use hasync_core::{
    Area, Controller, Device, EntityEntry, EntityState, Floor, Label, Pipeline, RegistryIndex,
    StateSnapshot,
};

use crate::cli::{AreaArgs, FloorArgs, GlobalOpts, LabelArgs};
use crate::error::CliError;
use crate::output;

/// Positional id that selects "unassigned".
const NONE_ID: &str = "none";

fn optional_id(id: &str) -> Option<&str> {
    (id != NONE_ID).then_some(id)
}

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct AreaRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Floor")]
    floor: String,
    #[tabled(rename = "Entities")]
    entities: String,
}

impl AreaRow {
    fn new(area: &Area, registry: &RegistryIndex) -> Self {
        Self {
            id: area.area_id.clone(),
            name: area.name.clone(),
            floor: area
                .floor_id
                .as_deref()
                .map(|id| registry.floor(id).map_or(id, |f| f.name.as_str()).to_owned())
                .unwrap_or_default(),
            entities: count(registry.entities_for_area(Some(&area.area_id))),
        }
    }
}

#[derive(Tabled)]
struct FloorRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Areas")]
    areas: String,
}

impl FloorRow {
    fn new(floor: &Floor, registry: &RegistryIndex) -> Self {
        Self {
            id: floor.floor_id.clone(),
            name: floor.name.clone(),
            level: floor.level.map(|l| l.to_string()).unwrap_or_default(),
            areas: count(registry.areas_for_floor(Some(&floor.floor_id))),
        }
    }
}

#[derive(Tabled)]
struct LabelRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Entities")]
    entities: String,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Manufacturer")]
    manufacturer: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Area")]
    area: String,
}

#[derive(Tabled)]
struct PipelineRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Language")]
    language: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Selected")]
    selected: String,
}

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
}

impl MemberRow {
    fn new(entry: &EntityEntry, states: Option<&StateSnapshot>, color: bool) -> Self {
        let state = states.and_then(|s| s.get(&entry.entity_id));
        Self {
            entity_id: entry.entity_id.clone(),
            name: entry
                .name
                .clone()
                .or_else(|| state.and_then(EntityState::friendly_name).map(str::to_owned))
                .unwrap_or_default(),
            state: state
                .map(|s| output::paint_state(&s.state, color))
                .unwrap_or_default(),
        }
    }
}

fn count<T>(result: Result<Vec<T>, hasync_core::NotReady>) -> String {
    result.map_or_else(|_| "-".into(), |v| v.len().to_string())
}

/// Render the visible entities of a membership query.
fn render_members(
    controller: &Controller,
    global: &GlobalOpts,
    members: &[&EntityEntry],
) -> String {
    let visible: Vec<&EntityEntry> = members.iter().copied().filter(|e| !e.is_hidden()).collect();
    let states = controller.context().states();
    let color = output::should_color(&global.color);
    output::render_list(
        &global.output,
        &visible,
        |e| MemberRow::new(e, states.as_deref(), color),
        |e| e.entity_id.clone(),
    )
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle_areas(
    controller: &Controller,
    args: AreaArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let registry = controller.registry();

    let out = match args.area_id.as_deref() {
        None => {
            let areas = registry.all_areas();
            output::render_list(
                &global.output,
                &areas,
                |a| AreaRow::new(a, &registry),
                |a| a.area_id.clone(),
            )
        }
        Some(id) => {
            let area_id = optional_id(id);
            if let Some(area_id) = area_id {
                if registry.area(area_id).is_none() {
                    return Err(not_found("area", area_id, "areas"));
                }
            }
            render_members(controller, global, &registry.entities_for_area(area_id)?)
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

/// One floor with its areas and entities, for structured output.
#[derive(Serialize)]
struct FloorView<'a> {
    floor: Option<&'a Floor>,
    areas: Vec<&'a Area>,
    entities: Vec<&'a EntityEntry>,
}

pub async fn handle_floors(
    controller: &Controller,
    args: FloorArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let registry = controller.registry();

    let out = match args.floor_id.as_deref() {
        None => {
            let floors = registry.all_floors();
            output::render_list(
                &global.output,
                &floors,
                |f| FloorRow::new(f, &registry),
                |f| f.floor_id.clone(),
            )
        }
        Some(id) => {
            let floor_id = optional_id(id);
            let floor = floor_id
                .map(|id| registry.floor(id).ok_or_else(|| not_found("floor", id, "floors")))
                .transpose()?;
            let view = FloorView {
                floor,
                areas: registry.areas_for_floor(floor_id)?,
                entities: registry.entities_for_floor(floor_id)?,
            };
            output::render_single(
                &global.output,
                &view,
                |v| {
                    let areas = output::render_list(
                        &global.output,
                        &v.areas,
                        |a| AreaRow::new(a, &registry),
                        |a| a.area_id.clone(),
                    );
                    let entities = render_members(controller, global, &v.entities);
                    format!("Areas\n{areas}\n\nEntities\n{entities}")
                },
                |v| {
                    v.entities
                        .iter()
                        .map(|e| e.entity_id.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            )
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_labels(
    controller: &Controller,
    args: LabelArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let registry = controller.registry();

    let out = match args.label_id.as_deref() {
        None => {
            let labels = registry.all_labels();
            output::render_list(
                &global.output,
                &labels,
                |l: &&Label| LabelRow {
                    id: l.label_id.clone(),
                    name: l.name.clone(),
                    entities: count(registry.entities_for_label(&l.label_id)),
                },
                |l| l.label_id.clone(),
            )
        }
        Some(id) => {
            if registry.label(id).is_none() {
                return Err(not_found("label", id, "labels"));
            }
            render_members(controller, global, &registry.entities_for_label(id)?)
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_devices(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let registry = controller.registry();
    let devices: Vec<Device> = controller
        .context()
        .devices()
        .map(|d| d.values().cloned().collect())
        .ok_or(CliError::RegistriesNotReady)?;

    let out = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow {
            id: d.id.clone(),
            name: d.display_name().to_owned(),
            manufacturer: d.manufacturer.clone().unwrap_or_default(),
            model: d.model.clone().unwrap_or_default(),
            area: d
                .area_id
                .as_deref()
                .and_then(|id| registry.area(id))
                .map(|a| a.name.clone())
                .unwrap_or_default(),
        },
        |d| d.id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_pipelines(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let context = controller.context();
    let pipelines: Vec<Pipeline> = context
        .pipelines()
        .map(|p| p.pipelines.clone())
        .unwrap_or_default();
    let selected = context.selected_pipeline();

    let out = output::render_list(
        &global.output,
        &pipelines,
        |p| PipelineRow {
            id: p.id.clone(),
            name: p.name.clone(),
            language: p.language.clone().unwrap_or_default(),
            agent: p.conversation_engine.clone().unwrap_or_default(),
            selected: if selected.as_deref() == Some(p.id.as_str()) {
                "*".into()
            } else {
                String::new()
            },
        },
        |p| p.id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

fn not_found(resource_type: &str, identifier: &str, list_command: &str) -> CliError {
    CliError::NotFound {
        resource_type: resource_type.into(),
        identifier: identifier.into(),
        list_command: list_command.into(),
    }
}
