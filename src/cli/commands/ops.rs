//! `labexec ops`: one screen of operational state.

use anyhow::Result;
use serde::Serialize;

use crate::application::Engine;
use crate::cli::display::{colorize_status, detail_lines, output, timestamp_opt, CommandOutput};
use crate::services::OperationsSnapshot;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct OpsOutput(pub OperationsSnapshot);

impl CommandOutput for OpsOutput {
    fn to_human(&self) -> String {
        let snapshot = &self.0;
        let by_status = if snapshot.runs_by_status.is_empty() {
            "-".to_string()
        } else {
            snapshot
                .runs_by_status
                .iter()
                .map(|(status, count)| format!("{} {count}", colorize_status(status)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        detail_lines(
            "Operations",
            &[
                ("Generated", timestamp_opt(Some(&snapshot.generated_at))),
                ("Runs", snapshot.total_runs.to_string()),
                ("By status", by_status),
                ("Retry candidates", snapshot.retry_candidates.to_string()),
                ("Open incidents", snapshot.open_incidents.to_string()),
                (
                    "Adapters",
                    format!(
                        "{} probed, {} unhealthy",
                        snapshot.adapter_health_records, snapshot.unhealthy_adapters
                    ),
                ),
                (
                    "Workers",
                    format!(
                        "{} leases, {} running",
                        snapshot.worker_leases, snapshot.running_workers
                    ),
                ),
            ],
        )
    }
}

pub async fn execute(engine: &Engine, json_mode: bool) -> Result<()> {
    let snapshot = engine.operations.snapshot().await?;
    output(&OpsOutput(snapshot), json_mode);
    Ok(())
}
