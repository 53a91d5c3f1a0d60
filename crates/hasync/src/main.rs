mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hasync_core::Controller;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a controller
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        cmd => {
            let controller = build_controller(&cli.global)?;
            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &controller, &cli.global).await
        }
    }
}

/// Build a `Controller` from the config file and the selected profile.
fn build_controller(global: &cli::GlobalOpts) -> Result<Controller, CliError> {
    let path = commands::config_cmd::resolve_path(global);
    let cfg = hasync_config::load_config_from(&path)?;
    let (profile_name, profile) = hasync_config::select_profile(&cfg, global.profile.as_deref())?;
    let sync = hasync_config::profile_to_sync_config(&profile, &profile_name)?;
    tracing::debug!(profile = %profile_name, configured = sync.is_configured(), "profile selected");

    let controller = Controller::new(sync);
    *controller.context().favorites() = profile.favorites();
    Ok(controller)
}
