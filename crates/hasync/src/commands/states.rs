//! State listing and single-entity handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabled::Tabled;

use hasync_core::grouping::{group_by_domain, is_ignored, should_group_by_domain};
use hasync_core::{Controller, EntityState, StateSnapshot, human_diff};

use crate::cli::{GlobalOpts, OutputFormat, StatesArgs};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct StateRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Changed")]
    changed: String,
}

impl StateRow {
    pub(crate) fn new(s: &EntityState, now: DateTime<Utc>, color: bool) -> Self {
        Self {
            entity_id: s.entity_id.clone(),
            name: s.friendly_name().unwrap_or_default().to_owned(),
            state: output::paint_state(&s.state, color),
            changed: s
                .last_changed
                .map(|t| human_diff(now, t))
                .unwrap_or_default(),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// States for display: live when online, cached when `--offline`.
pub(crate) async fn current_states(
    controller: &Controller,
    global: &GlobalOpts,
    refresh: bool,
) -> Result<Arc<StateSnapshot>, CliError> {
    if global.offline {
        return controller.context().states().ok_or(CliError::NoCache);
    }
    Ok(controller.states(refresh).await?)
}

fn keep(state: &EntityState, args: &StatesArgs, ignored: &[String]) -> bool {
    match &args.domain {
        Some(domain) => state.domain() == domain,
        None => args.all || !is_ignored(&state.entity_id, ignored),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle(
    controller: &Controller,
    args: StatesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let snapshot = current_states(controller, global, args.refresh).await?;

    let config = controller.config();
    let states: Vec<&EntityState> = snapshot
        .list()
        .iter()
        .filter(|s| keep(s, &args, &config.ignore_domains))
        .collect();

    let now = Utc::now();
    let color = output::should_color(&global.color);
    let ids: Vec<&str> = states.iter().map(|s| s.entity_id.as_str()).collect();
    let grouped = matches!(global.output, OutputFormat::Table)
        && !args.flat
        && args.domain.is_none()
        && should_group_by_domain(&ids, config.domain_menu, config.grouping);

    let out = if grouped {
        group_by_domain(&ids)
            .iter()
            .map(|(domain, members)| {
                let rows: Vec<StateRow> = members
                    .iter()
                    .filter_map(|id| snapshot.get(id))
                    .map(|s| StateRow::new(s, now, color))
                    .collect();
                format!(
                    "{} ({})\n{}",
                    output::heading(domain, color),
                    rows.len(),
                    output::render_table(&rows)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        output::render_list(
            &global.output,
            &states,
            |s| StateRow::new(s, now, color),
            |s| s.entity_id.clone(),
        )
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_entity(
    controller: &Controller,
    entity_id: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::sync(controller, global).await?;
    let state = controller.entity(entity_id)?;
    let registry = controller.registry();

    let now = Utc::now();
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &state,
        |s| {
            let mut pairs = vec![
                ("Entity", s.entity_id.clone()),
                ("Name", s.display_name().to_owned()),
                ("State", output::paint_state(&s.state, color)),
            ];
            if let Some(changed) = s.last_changed {
                pairs.push(("Changed", format!("{} ago", human_diff(now, changed))));
            }
            if let Some(area) = registry
                .entity(&s.entity_id)
                .and_then(|e| registry.effective_area(e))
                .and_then(|id| registry.area(id))
            {
                pairs.push(("Area", area.name.clone()));
            }
            let mut detail = output::detail_lines(&pairs);
            if !s.attributes.is_empty() {
                detail.push_str("\n\nAttributes:");
                for (key, value) in &s.attributes {
                    detail.push_str(&format!("\n  {key}: {value}"));
                }
            }
            detail
        },
        |s| s.state.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
