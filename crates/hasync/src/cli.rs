//! Clap derive structures for the `hasync` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hasync -- a synchronized command-line view of Home Assistant
#[derive(Debug, Parser)]
#[command(
    name = "hasync",
    version,
    about = "Inspect and control Home Assistant from the command line",
    long_about = "Keeps a synchronized view of a Home Assistant instance over its\n\
        WebSocket API: entity states, areas, floors, devices, labels, and\n\
        assist pipelines, with an on-disk snapshot cache for offline reads.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "HASYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "HASYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HASYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Serve reads from the snapshot cache without connecting
    #[arg(long, global = true)]
    pub offline: bool,

    /// Seconds to wait for the initial sync
    #[arg(long, env = "HASYNC_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

impl GlobalOpts {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List entity states
    #[command(alias = "st")]
    States(StatesArgs),

    /// Show one entity's state and attributes
    #[command(alias = "get")]
    Entity {
        /// Entity id (e.g. light.kitchen)
        entity_id: String,
    },

    /// List areas, or the entities of one area
    #[command(alias = "area")]
    Areas(AreaArgs),

    /// List floors, or the areas and entities of one floor
    #[command(alias = "floor")]
    Floors(FloorArgs),

    /// List labels, or the entities carrying one label
    #[command(alias = "label")]
    Labels(LabelArgs),

    /// List devices
    #[command(alias = "dev")]
    Devices,

    /// List assist pipelines
    Pipelines,

    /// List favorite entities with their current state
    #[command(alias = "fav")]
    Favorites,

    /// Stream live state changes
    Watch(WatchArgs),

    /// Call a service
    Call(CallArgs),

    /// Turn an entity on
    On {
        entity_id: String,
    },

    /// Turn an entity off
    Off {
        entity_id: String,
    },

    /// Toggle an entity
    Toggle {
        entity_id: String,
    },

    /// Inspect or clear the snapshot cache
    Cache(CacheArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ── States ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatesArgs {
    /// Bypass the state TTL and refetch
    #[arg(long, short = 'r')]
    pub refresh: bool,

    /// Only show entities of this domain
    #[arg(long, short = 'd')]
    pub domain: Option<String>,

    /// Include ignored domains
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Never group the listing by domain
    #[arg(long)]
    pub flat: bool,
}

// ── Registry ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AreaArgs {
    /// Area id; `none` lists entities without an area
    pub area_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct FloorArgs {
    /// Floor id; `none` lists areas without a floor
    pub floor_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct LabelArgs {
    pub label_id: Option<String>,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Entities to watch (defaults to favorites, then everything)
    pub entity_ids: Vec<String>,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long = "for", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

// ── Call ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Service domain (e.g. light)
    pub domain: String,

    /// Service name (e.g. turn_on)
    pub service: String,

    /// Target entity; repeatable
    #[arg(long, short = 'e')]
    pub entity: Vec<String>,

    /// Service data as a JSON object
    #[arg(long)]
    pub data: Option<String>,
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show what the snapshot cache holds
    Show,
    /// Delete every cached snapshot
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the effective configuration (tokens redacted)
    Show,

    /// List profiles
    Profiles,

    /// Create or update a profile
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Home Assistant base URL
        #[arg(long)]
        url: String,

        /// Read the token from this environment variable
        #[arg(long)]
        token_env: Option<String>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Store a profile's access token in the system keyring (read from stdin)
    SetToken {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        name: Option<String>,
    },
}
