//! Shared configuration for the hasync CLI.
//!
//! TOML profiles merged with `HASYNC_` environment variables, token
//! resolution (env → keyring → plaintext), and translation to
//! `hasync_core::SyncConfig`. A profile may leave URL or token unset;
//! the core reports that as "setup required" instead of failing here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hasync_core::config::DEFAULT_IGNORE_DOMAINS;
use hasync_core::{DomainMenu, Favorite, Favorites, GroupingThresholds, SyncConfig};

const KEYRING_SERVICE: &str = "hasync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Seconds to wait for the initial sync.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named Home Assistant profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Base URL (e.g., "http://homeassistant.local:8123").
    pub url: Option<String>,

    /// Long-lived access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// State list TTL in seconds.
    pub refresh_interval: Option<u64>,

    /// Persist snapshots for cold start.
    pub cache: Option<bool>,

    pub cache_dir: Option<PathBuf>,

    /// Conversation engine whose pipeline is selected by default.
    pub voice_agent: Option<String>,

    pub domain_menu: Option<DomainMenu>,
    pub domain_menu_min_entities: Option<usize>,
    pub domain_menu_min_domains: Option<usize>,

    /// Domains hidden from state listings. Unset means the built-in list.
    pub ignore_domains: Option<Vec<String>>,

    #[serde(default)]
    pub favorites: Vec<Favorite>,
}

impl Profile {
    pub fn favorites(&self) -> Favorites {
        Favorites::new(self.favorites.clone())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "hasync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Platform cache directory; each profile gets its own subdirectory.
pub fn cache_root() -> Option<PathBuf> {
    ProjectDirs::from("", "", "hasync").map(|dirs| dirs.cache_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hasync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested environment keys use a double underscore:
/// `HASYNC_PROFILES__HOME__URL` sets `profiles.home.url`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HASYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

/// Pick the requested profile, else the default one.
///
/// An absent default profile resolves to an empty one, which the core
/// then reports as "setup required".
pub fn select_profile(cfg: &Config, requested: Option<&str>) -> Result<(String, Profile), ConfigError> {
    if let Some(name) = requested {
        return cfg
            .profiles
            .get(name)
            .map(|p| (name.to_owned(), p.clone()))
            .ok_or_else(|| {
                let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
                names.sort_unstable();
                ConfigError::ProfileNotFound {
                    name: name.to_owned(),
                    available: if names.is_empty() {
                        "none".into()
                    } else {
                        names.join(", ")
                    },
                }
            });
    }

    let name = cfg.default_profile.clone().unwrap_or_else(|| "default".into());
    let profile = cfg.profiles.get(&name).cloned().unwrap_or_default();
    Ok((name, profile))
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the access token from the credential chain.
///
/// `None` when no source provides one.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

/// Store `token` in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| ConfigError::Validation {
            field: "token".into(),
            reason: format!("keyring unavailable: {e}"),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Parse a profile URL; only `http` and `https` are accepted.
pub fn parse_url(raw: &str) -> Result<url::Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Validation {
        field: "url".into(),
        reason,
    };
    let url = raw
        .trim()
        .parse::<url::Url>()
        .map_err(|e| invalid(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("{raw}: unsupported scheme '{other}'"))),
    }
}

/// Build a `SyncConfig` from a profile.
///
/// Only a malformed URL is an error; missing values stay `None`.
pub fn profile_to_sync_config(profile: &Profile, profile_name: &str) -> Result<SyncConfig, ConfigError> {
    let url = profile
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(parse_url)
        .transpose()?;

    let defaults = SyncConfig::default();
    let thresholds = GroupingThresholds {
        min_entities: profile
            .domain_menu_min_entities
            .unwrap_or(defaults.grouping.min_entities),
        min_domains: profile
            .domain_menu_min_domains
            .unwrap_or(defaults.grouping.min_domains),
    };

    Ok(SyncConfig {
        url,
        token: resolve_token(profile, profile_name),
        refresh_interval_secs: profile
            .refresh_interval
            .unwrap_or(defaults.refresh_interval_secs),
        cache_enabled: profile.cache.unwrap_or(defaults.cache_enabled),
        cache_dir: profile
            .cache_dir
            .clone()
            .or_else(cache_root)
            .map(|dir| dir.join(profile_name)),
        voice_agent: profile.voice_agent.clone(),
        domain_menu: profile.domain_menu.unwrap_or_default(),
        grouping: thresholds,
        ignore_domains: profile.ignore_domains.clone().unwrap_or_else(|| {
            DEFAULT_IGNORE_DOMAINS.iter().map(|d| (*d).to_owned()).collect()
        }),
        ..defaults
    })
}

// ── Tests ───────────────────────────────────────────────────────────
