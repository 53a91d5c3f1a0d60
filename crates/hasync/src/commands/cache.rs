//! Snapshot cache handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use hasync_core::{CacheSummary, Controller, human_diff};

use crate::cli::{CacheArgs, CacheCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct CacheView {
    saved_at: DateTime<Utc>,
    datasets: Vec<DatasetView>,
}

#[derive(Serialize, Tabled)]
struct DatasetView {
    #[tabled(rename = "Dataset")]
    name: String,
    #[tabled(rename = "Bytes")]
    bytes: usize,
}

impl From<CacheSummary> for CacheView {
    fn from(summary: CacheSummary) -> Self {
        Self {
            saved_at: summary.saved_at,
            datasets: summary
                .datasets
                .into_iter()
                .map(|(key, bytes)| DatasetView {
                    name: key.to_string(),
                    bytes,
                })
                .collect(),
        }
    }
}

pub fn handle(controller: &Controller, args: CacheArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let Some(cache) = controller.cache() else {
        return Err(CliError::Validation {
            field: "cache".into(),
            reason: "the snapshot cache is disabled for this profile".into(),
        });
    };

    match args.command {
        CacheCommand::Show => {
            let view = CacheView::from(cache.summary().ok_or(CliError::NoCache)?);
            let out = output::render_single(
                &global.output,
                &view,
                |v| {
                    format!(
                        "Saved {} ago ({})\n{}",
                        human_diff(Utc::now(), v.saved_at),
                        v.saved_at.to_rfc3339(),
                        output::render_table(&v.datasets)
                    )
                },
                |v| v.saved_at.to_rfc3339(),
            );
            output::print_output(&out, global.quiet);
        }
        CacheCommand::Clear => {
            cache.clear();
            if !global.quiet {
                eprintln!("Snapshot cache cleared");
            }
        }
    }
    Ok(())
}
