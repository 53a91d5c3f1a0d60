// ── Runtime synchronization configuration ──
//
// Everything the engine needs to reach the backend and tune its caches.
// The CLI builds a `SyncConfig` from its profile and hands it in;
// core never reads config files. URL and token stay optional: a missing
// value surfaces as `CoreError::SetupRequired` at connect time.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use hasync_api::{DEFAULT_ID_CEILING, ReconnectConfig};

/// Whether entity listings should be grouped by domain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DomainMenu {
    Yes,
    No,
    #[default]
    Conditional,
}

/// Thresholds for [`DomainMenu::Conditional`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingThresholds {
    pub min_entities: usize,
    pub min_domains: usize,
}

impl Default for GroupingThresholds {
    fn default() -> Self {
        Self {
            min_entities: 10,
            min_domains: 2,
        }
    }
}

/// Domains hidden from state listings unless asked for explicitly.
pub const DEFAULT_IGNORE_DOMAINS: &[&str] = &[
    "assist_satellite",
    "conversation",
    "tts",
    "stt",
    "wake_word",
    "tag",
    "todo",
    "update",
    "zone",
];

/// Configuration for one synchronized backend.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend base URL (e.g., `http://homeassistant.local:8123`).
    pub url: Option<Url>,
    /// Long-lived access token.
    pub token: Option<SecretString>,
    /// State list TTL in seconds; a fetch younger than this is reused.
    pub refresh_interval_secs: u64,
    /// Socket reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Correlation ids wrap above this value.
    pub id_ceiling: u64,
    /// Pause between tearing down and reconnecting during `restart()`.
    pub restart_settle: Duration,
    /// Persist snapshots for cold start.
    pub cache_enabled: bool,
    /// Directory for the snapshot cache. `None` uses the platform cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Conversation engine that picks the default assist pipeline.
    pub voice_agent: Option<String>,
    pub domain_menu: DomainMenu,
    pub grouping: GroupingThresholds,
    pub ignore_domains: Vec<String>,
    /// Back presses needed to leave the reconnecting screen.
    pub exit_presses: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            refresh_interval_secs: 15,
            reconnect: ReconnectConfig::default(),
            id_ceiling: DEFAULT_ID_CEILING,
            restart_settle: Duration::from_millis(500),
            cache_enabled: true,
            cache_dir: None,
            voice_agent: None,
            domain_menu: DomainMenu::default(),
            grouping: GroupingThresholds::default(),
            ignore_domains: DEFAULT_IGNORE_DOMAINS.iter().map(|d| (*d).to_owned()).collect(),
            exit_presses: 3,
        }
    }
}

impl SyncConfig {
    /// True when both URL and token are present.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.token.is_some()
    }

    /// Resolve the snapshot cache directory.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "hasync").map(|d| d.cache_dir().to_path_buf())
        })
    }
}
