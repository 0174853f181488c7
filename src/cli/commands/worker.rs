//! Background worker CLI commands.

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::info;

use crate::application::Engine;
use crate::cli::display::{
    action_failure, action_success, colorize_status, flag, list_table, output, render_list,
    timestamp_opt, truncate, CommandOutput,
};
use crate::cli::types::WorkerCommands;
use crate::domain::models::{WorkerId, WorkerLeaseState};
use crate::services::{TickReport, WorkerStatus};

#[derive(Debug, Serialize)]
pub struct WorkerStatusOutput {
    pub workers: Vec<WorkerStatus>,
}

impl CommandOutput for WorkerStatusOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&[
            "worker", "running", "interval", "lease owner", "lease until", "last run", "errors", "note",
        ]);
        for status in &self.workers {
            let note = if status.degraded {
                "lease writes failing".to_string()
            } else if let Some(holder) = &status.lease_blocked_by {
                format!("blocked by {holder}")
            } else {
                status.last_error.as_deref().map(|e| truncate(e, 40)).unwrap_or_default()
            };
            table.add_row(vec![
                status.worker_id.to_string(),
                flag(status.running),
                format!("{}ms", status.interval_ms),
                status.lease_owner.clone().unwrap_or_else(|| "-".to_string()),
                timestamp_opt(status.lease_expires_at.as_ref()),
                timestamp_opt(status.last_run_at.as_ref()),
                status.error_streak.to_string(),
                note,
            ]);
        }
        render_list("worker", &table, self.workers.len())
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TickOutput(pub TickReport);

impl CommandOutput for TickOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        if report.skipped {
            return action_failure(&format!("{}: a tick is already in flight", report.worker_id));
        }
        if let Some(error) = &report.error {
            return action_failure(&format!("{}: {error}", report.worker_id));
        }
        let summary = report
            .summary
            .as_ref()
            .map(|s| serde_json::to_string_pretty(s).unwrap_or_default())
            .unwrap_or_default();
        format!("{}\n{summary}", action_success(&format!("{} tick finished", report.worker_id)))
    }
}

#[derive(Debug, Serialize)]
pub struct LeaseListOutput {
    pub leases: Vec<WorkerLeaseState>,
}

impl CommandOutput for LeaseListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["worker", "running", "owner", "expires", "updated"]);
        for lease in &self.leases {
            table.add_row(vec![
                lease.worker_id.to_string(),
                flag(lease.running),
                lease.lease_owner.clone().unwrap_or_else(|| "-".to_string()),
                timestamp_opt(lease.lease_expires_at.as_ref()),
                timestamp_opt(Some(&lease.updated_at)),
            ]);
        }
        render_list("lease", &table, self.leases.len())
    }
}

fn parse_worker(raw: &str) -> Result<WorkerId> {
    WorkerId::from_str(raw).ok_or_else(|| {
        let known: Vec<&str> = WorkerId::ALL.iter().map(WorkerId::as_str).collect();
        anyhow!("unknown worker: {raw} (expected one of {})", known.join(", "))
    })
}

/// Run a worker under its lease until ctrl-c, then stop it and persist.
async fn run_foreground(
    engine: &Engine,
    worker_id: WorkerId,
    interval_ms: Option<u64>,
    takeover: bool,
    json_mode: bool,
) -> Result<()> {
    let status = engine.workers.start(worker_id, interval_ms, takeover).await?;
    if !status.running {
        output(&WorkerStatusOutput { workers: vec![status] }, json_mode);
        anyhow::bail!("{worker_id} lease is held by another owner; use --takeover to force");
    }

    info!(worker_id = %worker_id, owner = %status.owner, "worker running, press ctrl-c to stop");
    if !json_mode {
        eprintln!(
            "{}",
            action_success(&format!(
                "{worker_id} running every {}ms as {} ({})",
                status.interval_ms,
                status.owner,
                colorize_status("running")
            ))
        );
    }

    tokio::signal::ctrl_c().await?;
    let stopped = engine.workers.stop(worker_id, true).await?;
    output(&WorkerStatusOutput { workers: vec![stopped] }, json_mode);
    Ok(())
}

pub async fn execute(engine: &Engine, command: WorkerCommands, json_mode: bool) -> Result<()> {
    match command {
        WorkerCommands::Status { worker } => {
            let workers = match worker {
                Some(raw) => vec![engine.workers.status(parse_worker(&raw)?).await?],
                None => engine.workers.statuses().await?,
            };
            output(&WorkerStatusOutput { workers }, json_mode);
        }

        WorkerCommands::RunOnce { worker } => {
            let report = engine.workers.run_once(parse_worker(&worker)?).await?;
            let failed = report.error.is_some();
            output(&TickOutput(report), json_mode);
            if failed {
                anyhow::bail!("{worker} tick failed");
            }
        }

        WorkerCommands::Start {
            worker,
            interval_ms,
            takeover,
        } => {
            run_foreground(engine, parse_worker(&worker)?, interval_ms, takeover, json_mode).await?;
        }

        WorkerCommands::Takeover { worker, interval_ms } => {
            run_foreground(engine, parse_worker(&worker)?, interval_ms, true, json_mode).await?;
        }

        WorkerCommands::Leases => {
            let leases = engine.workers.list_leases().await?;
            output(&LeaseListOutput { leases }, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_aliases() {
        assert_eq!(parse_worker("poller").unwrap(), WorkerId::ExecutionPoller);
        assert_eq!(parse_worker("retry_worker").unwrap(), WorkerId::RetryWorker);
        let err = parse_worker("janitor").unwrap_err().to_string();
        assert!(err.contains("incident-scanner"));
    }
}
