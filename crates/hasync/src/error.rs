//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hasync_config::ConfigError;
use hasync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Setup ────────────────────────────────────────────────────────
    #[error("Setup required: no {missing} configured")]
    #[diagnostic(
        code(hasync::setup_required),
        help(
            "Create a profile with: hasync config init --url http://homeassistant.local:8123\n\
             Then store a token with: hasync config set-token"
        )
    )]
    SetupRequired { missing: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to Home Assistant at {url}")]
    #[diagnostic(
        code(hasync::connection_failed),
        help("Check that Home Assistant is running and reachable.\n{reason}")
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(hasync::auth_failed),
        help(
            "Create a long-lived access token under your Home Assistant user profile.\n\
             Run: hasync config set-token"
        )
    )]
    AuthFailed { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(hasync::not_found),
        help("Run: hasync {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Registries are not loaded yet")]
    #[diagnostic(
        code(hasync::registries_not_ready),
        help("Run the command again once connected, or without --offline.")
    )]
    RegistriesNotReady,

    #[error("No snapshot cache available")]
    #[diagnostic(
        code(hasync::no_cache),
        help("Run any command once while online to populate the cache.")
    )]
    NoCache,

    // ── API ──────────────────────────────────────────────────────────
    #[error("Request '{request}' failed ({code}): {message}")]
    #[diagnostic(code(hasync::api_error))]
    ApiError {
        request: String,
        code: String,
        message: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hasync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hasync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hasync config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(hasync::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for {what}")]
    #[diagnostic(
        code(hasync::timeout),
        help("Increase the wait with --timeout, or use --offline to read the cache.")
    )]
    Timeout { what: String, seconds: u64 },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(hasync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(hasync::json), help("Pass service data as a JSON object, e.g. '{{\"brightness\": 128}}'."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::SetupRequired { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoCache => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    pub(crate) fn entity_not_found(entity_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: "entity".into(),
            identifier: entity_id.into(),
            list_command: "states".into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SetupRequired { missing } => CliError::SetupRequired {
                missing: missing.into(),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::NotConnected => CliError::ConnectionFailed {
                url: "(not connected)".into(),
                reason: "No session is open".into(),
            },

            CoreError::Disconnected => CliError::ConnectionFailed {
                url: "(disconnected)".into(),
                reason: "The connection was lost before the request completed".into(),
            },

            CoreError::Timeout { what, timeout_secs } => CliError::Timeout {
                what,
                seconds: timeout_secs,
            },

            CoreError::Fetch {
                request,
                code,
                message,
            } => CliError::ApiError {
                request,
                code,
                message,
            },

            CoreError::RegistriesNotReady => CliError::RegistriesNotReady,

            CoreError::EntityNotFound { entity_id } => CliError::entity_not_found(entity_id),

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}

impl From<hasync_core::NotReady> for CliError {
    fn from(_: hasync_core::NotReady) -> Self {
        CliError::RegistriesNotReady
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_required_exits_with_auth_code() {
        let err: CliError = CoreError::SetupRequired { missing: "URL" }.into();
        assert_eq!(err.exit_code(), exit_code::AUTH);
        assert_eq!(err.to_string(), "Setup required: no URL configured");
    }

    #[test]
    fn missing_entity_points_at_listing() {
        let err: CliError = CoreError::EntityNotFound {
            entity_id: "light.nowhere".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(matches!(err, CliError::NotFound { ref list_command, .. } if list_command == "states"));
    }

    #[test]
    fn profile_errors_are_usage_errors() {
        let err: CliError = ConfigError::ProfileNotFound {
            name: "cabin".into(),
            available: "home".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
