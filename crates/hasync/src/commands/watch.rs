//! Live state watcher.
//!
//! Subscribes to compressed entity diffs and prints each change. A
//! relative-time scheduler re-prints an entity whenever its "changed
//! ... ago" age rolls over to a new value.

use std::future;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use hasync_core::grouping::is_ignored;
use hasync_core::{
    Controller, EntityDiff, EntityState, RelativeTimeScheduler, SchedulerConfig, Tick, human_diff,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One printed change, for structured output.
#[derive(Serialize)]
struct Change<'a> {
    entity_id: &'a str,
    state: Option<&'a str>,
    last_changed: Option<chrono::DateTime<Utc>>,
}

/// Explicit ids, else favorites, else every non-ignored entity.
fn watch_targets(controller: &Controller, explicit: Vec<String>) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit;
    }
    let favorites = controller.context().favorites().entity_ids();
    if !favorites.is_empty() {
        return favorites;
    }
    let ignored = &controller.config().ignore_domains;
    controller
        .context()
        .states()
        .map(|s| {
            s.list()
                .iter()
                .filter(|e| !is_ignored(&e.entity_id, ignored))
                .map(|e| e.entity_id.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn print_state(entity_id: &str, state: Option<&EntityState>, global: &GlobalOpts) {
    let line = match global.output {
        OutputFormat::Table => {
            let color = output::should_color(&global.color);
            match state {
                Some(s) => {
                    let age = s
                        .last_changed
                        .map(|t| format!(" ({} ago)", human_diff(Utc::now(), t)))
                        .unwrap_or_default();
                    format!("{entity_id}  {}{age}", output::paint_state(&s.state, color))
                }
                None => format!("{entity_id}  removed"),
            }
        }
        OutputFormat::Plain => format!("{entity_id}={}", state.map_or("", |s| s.state.as_str())),
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(
            &Change {
                entity_id,
                state: state.map(|s| s.state.as_str()),
                last_changed: state.and_then(|s| s.last_changed),
            },
            true,
        ),
    };
    output::print_output(&line, global.quiet);
}

fn on_diff(
    controller: &Controller,
    scheduler: &RelativeTimeScheduler,
    diff: &EntityDiff,
    global: &GlobalOpts,
) {
    for entity_id in diff.added.keys().chain(diff.changed.keys()) {
        let state = controller.entity(entity_id).ok();
        if let Some(changed) = state.as_ref().and_then(|s| s.last_changed) {
            scheduler.update(entity_id.as_str(), changed);
        }
        print_state(entity_id, state.as_ref(), global);
    }
    for entity_id in &diff.removed {
        scheduler.unregister(entity_id.as_str());
        print_state(entity_id, None, global);
    }
}

fn on_tick(controller: &Controller, tick: &Tick, global: &GlobalOpts) {
    // Ages only mean something in the human-readable view.
    if !matches!(global.output, OutputFormat::Table) {
        return;
    }
    if let Ok(state) = controller.entity(&tick.id) {
        print_state(&tick.id, Some(&state), global);
    }
}

pub async fn handle(
    controller: &Controller,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    super::require_online(global, "watch")?;
    super::sync(controller, global).await?;

    let targets = watch_targets(controller, args.entity_ids);
    if targets.is_empty() {
        return Err(CliError::Validation {
            field: "entity".into(),
            reason: "nothing to watch".into(),
        });
    }

    let mut stream = controller.subscribe_entities(&targets)?;
    stream.confirmed().await?;
    tracing::info!(entities = targets.len(), "watching");

    let cancel = CancellationToken::new();
    let (scheduler, mut ticks) = RelativeTimeScheduler::spawn(SchedulerConfig::default(), cancel);

    let deadline = async {
        match args.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            () = &mut deadline => break,
            diff = stream.next_diff() => {
                let Some(diff) = diff else {
                    tracing::warn!("subscription ended");
                    break;
                };
                on_diff(controller, &scheduler, &diff, global);
            }
            Some(tick) = ticks.recv() => on_tick(controller, &tick, global),
        }
    }

    scheduler.destroy();
    controller.unsubscribe(stream);
    Ok(())
}
