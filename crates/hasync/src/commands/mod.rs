//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod cache;
pub mod call;
pub mod config_cmd;
pub mod favorites;
pub mod registry;
pub mod states;
pub mod watch;

use hasync_core::Controller;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let result = match cmd {
        Command::States(args) => states::handle(controller, args, global).await,
        Command::Entity { entity_id } => states::handle_entity(controller, &entity_id, global).await,
        Command::Areas(args) => registry::handle_areas(controller, args, global).await,
        Command::Floors(args) => registry::handle_floors(controller, args, global).await,
        Command::Labels(args) => registry::handle_labels(controller, args, global).await,
        Command::Devices => registry::handle_devices(controller, global).await,
        Command::Pipelines => registry::handle_pipelines(controller, global).await,
        Command::Favorites => favorites::handle(controller, global).await,
        Command::Watch(args) => watch::handle(controller, args, global).await,
        Command::Call(args) => call::handle(controller, args, global).await,
        Command::On { entity_id } => call::handle_entity(controller, "turn_on", &entity_id, global).await,
        Command::Off { entity_id } => call::handle_entity(controller, "turn_off", &entity_id, global).await,
        Command::Toggle { entity_id } => call::handle_entity(controller, "toggle", &entity_id, global).await,
        Command::Cache(args) => cache::handle(controller, args, global),
        // Config is handled before dispatch
        Command::Config(_) => unreachable!(),
    };
    controller.disconnect();
    result
}

// ── Shared helpers ───────────────────────────────────────────────────

/// Make the context ready for reads.
///
/// Online: connect and wait for the initial sync. Offline: restore the
/// snapshot cache and never open a socket.
pub(crate) async fn sync(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    if global.offline {
        if !controller.load_cache() {
            return Err(CliError::NoCache);
        }
        tracing::debug!("serving from snapshot cache");
        return Ok(());
    }

    controller.connect()?;
    controller.wait_synced(global.timeout()).await?;
    Ok(())
}

/// Whether the active session is online and may issue requests.
pub(crate) fn require_online(global: &GlobalOpts, what: &str) -> Result<(), CliError> {
    if global.offline {
        return Err(CliError::Validation {
            field: "--offline".into(),
            reason: format!("{what} needs a live connection"),
        });
    }
    Ok(())
}
