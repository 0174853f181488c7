//! Long-running commands: `serve` and `executor`.

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::Engine;
use crate::cli::display::{action_success, output, CommandOutput};
use crate::executor::{ClaimCycleReport, RunnerRegistry};

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ClaimCycleOutput(pub ClaimCycleReport);

impl CommandOutput for ClaimCycleOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        action_success(&format!(
            "Claimed {}: {} completed, {} failed, {} rejected, {} errors",
            report.claimed, report.completed, report.failed, report.rejected, report.errors
        ))
    }
}

/// Run the leased workers (and optionally an executor) until ctrl-c.
pub async fn serve(engine: &Engine, no_restore: bool, with_executor: bool) -> Result<()> {
    if no_restore {
        info!("skipping worker restore");
    } else {
        let restored = engine.workers.restore_all().await;
        info!(count = restored.iter().filter(|s| s.running).count(), "workers restored");
    }
    let started = engine.workers.autostart().await;
    for status in started.iter().filter(|s| !s.running) {
        warn!(
            worker_id = %status.worker_id,
            lease_owner = status.lease_blocked_by.as_deref().unwrap_or(""),
            "worker not started, lease held elsewhere"
        );
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let executor = if with_executor {
        let claim_loop = engine.claim_loop(RunnerRegistry::default());
        info!(executor_id = claim_loop.executor_id(), "starting in-process executor");
        Some(tokio::spawn(async move { claim_loop.run(stop_rx).await }))
    } else {
        None
    };

    info!(owner = engine.workers.owner(), "labexec serving, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = stop_tx.send(true);
    if let Some(handle) = executor {
        if let Err(e) = handle.await {
            warn!(error = %e, "executor task ended abnormally");
        }
    }
    engine.workers.stop_all(true).await;
    Ok(())
}

/// Run the executor claim loop, once or until ctrl-c.
pub async fn executor(engine: &Engine, once: bool, json_mode: bool) -> Result<()> {
    let claim_loop = engine.claim_loop(RunnerRegistry::default());
    if once {
        let report = claim_loop.poll_once().await?;
        output(&ClaimCycleOutput(report), json_mode);
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { claim_loop.run(stop_rx).await });
    tokio::signal::ctrl_c().await?;
    let _ = stop_tx.send(true);
    handle.await?;
    Ok(())
}
