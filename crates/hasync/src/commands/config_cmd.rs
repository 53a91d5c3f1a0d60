//! Config subcommand handlers.

use std::io::BufRead;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use tabled::Tabled;

use hasync_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

/// `--config` if given, else the platform config path.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

fn redact(cfg: &mut Config) {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Default")]
    default: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = resolve_path(global);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
        }

        ConfigCommand::Show => {
            let mut cfg = config::load_config_from(&path)?;
            redact(&mut cfg);
            let out = match global.output {
                OutputFormat::Json => output::render_json(&cfg, false),
                OutputFormat::JsonCompact => output::render_json(&cfg, true),
                OutputFormat::Table | OutputFormat::Plain => {
                    toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                        field: "config".into(),
                        reason: format!("failed to serialize config: {e}"),
                    })?
                }
            };
            output::print_output(&out, global.quiet);
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_from(&path)?;
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort_unstable();
            let default = cfg.default_profile.as_deref();
            let out = output::render_list(
                &global.output,
                &names,
                |name| ProfileRow {
                    name: (*name).clone(),
                    url: cfg
                        .profiles
                        .get(*name)
                        .and_then(|p| p.url.clone())
                        .unwrap_or_default(),
                    default: if default == Some(name.as_str()) {
                        "*".into()
                    } else {
                        String::new()
                    },
                },
                |name| (*name).clone(),
            );
            output::print_output(&out, global.quiet);
        }

        ConfigCommand::Init {
            name,
            url,
            token_env,
            default,
        } => {
            let mut cfg = config::load_config_from(&path)?;
            let mut profile = cfg.profiles.get(&name).cloned().unwrap_or_default();
            config::parse_url(&url)?;
            profile.url = Some(url);
            if token_env.is_some() {
                profile.token_env = token_env;
            }

            let first = cfg.profiles.is_empty();
            cfg.profiles.insert(name.clone(), profile);
            if default || first {
                cfg.default_profile = Some(name.clone());
            }
            config::save_config_to(&cfg, &path)?;
            tracing::info!(profile = %name, path = %path.display(), "profile saved");
            if !global.quiet {
                eprintln!("Profile '{name}' saved to {}", path.display());
            }
        }

        ConfigCommand::SetToken { name } => {
            let cfg = config::load_config_from(&path)?;
            let name = name
                .or_else(|| global.profile.clone())
                .or(cfg.default_profile)
                .unwrap_or_else(|| "default".into());

            if !global.quiet {
                eprintln!("Paste the long-lived access token for '{name}' and press Enter:");
            }
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let token = SecretString::from(line.trim().to_owned());
            if token.expose_secret().is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            config::store_token(&name, token.expose_secret())?;
            if !global.quiet {
                eprintln!("Token stored in the system keyring");
            }
        }
    }
    Ok(())
}
