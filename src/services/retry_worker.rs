//! Automatic retries for transient failures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionRun, FailureClass, RunStatus, WorkerId};
use crate::domain::ports::{AttemptLauncher, WorkerUnit};
use crate::services::execution_run_store::{parent_ids, ExecutionRunStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    pub scanned: usize,
    pub transient_failed: usize,
    pub attempted: usize,
    pub retried: usize,
    pub retry_errors: usize,
    pub exhausted_marked: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Candidates handled per tick.
    pub batch_limit: usize,
}

pub struct ExecutionRetryWorker {
    runs: ExecutionRunStore,
    launcher: Arc<dyn AttemptLauncher>,
    policy: RetryPolicy,
}

impl ExecutionRetryWorker {
    pub fn new(runs: ExecutionRunStore, launcher: Arc<dyn AttemptLauncher>, policy: RetryPolicy) -> Self {
        Self {
            runs,
            launcher,
            policy,
        }
    }

    /// Failed transient runs without a retry child, ordered by id.
    pub fn candidates(runs: &[ExecutionRun]) -> Vec<&ExecutionRun> {
        let parents = parent_ids(runs);
        let mut candidates: Vec<&ExecutionRun> = runs
            .iter()
            .filter(|run| run.is_retry_candidate() && !parents.contains(&run.id))
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates
    }

    pub async fn sweep(&self) -> DomainResult<RetrySummary> {
        let runs = self.runs.list().await?;
        let mut summary = RetrySummary {
            scanned: runs.len(),
            transient_failed: runs
                .iter()
                .filter(|r| r.status == RunStatus::Failed && r.failure_class == Some(FailureClass::Transient))
                .count(),
            ..RetrySummary::default()
        };

        for candidate in Self::candidates(&runs).into_iter().take(self.policy.batch_limit) {
            if candidate.attempt >= self.policy.max_attempts {
                match self.mark_exhausted(&candidate.id).await {
                    Ok(()) => summary.exhausted_marked += 1,
                    Err(e) => {
                        warn!(run_id = %candidate.id, error = %e, "failed to mark run retry-exhausted");
                        summary.retry_errors += 1;
                    }
                }
                continue;
            }

            summary.attempted += 1;
            match self.launcher.launch_retry(candidate).await {
                Ok(child) => {
                    info!(
                        run_id = %candidate.id,
                        child_run_id = %child.id,
                        attempt = child.attempt,
                        "retry attempt launched"
                    );
                    summary.retried += 1;
                }
                Err(e) => {
                    warn!(run_id = %candidate.id, error = %e, "retry attempt failed to launch");
                    summary.retry_errors += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn mark_exhausted(&self, run_id: &str) -> DomainResult<()> {
        let max_attempts = self.policy.max_attempts;
        self.runs
            .update(run_id, "Mark retry exhausted", |run| {
                run.retry_exhausted = true;
                run.retry_exhausted_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        info!(run_id, max_attempts, "run exhausted its retry budget");
        Ok(())
    }
}

#[async_trait]
impl WorkerUnit for ExecutionRetryWorker {
    fn worker_id(&self) -> WorkerId {
        WorkerId::RetryWorker
    }

    async fn run_tick(&self) -> DomainResult<Value> {
        Ok(serde_json::to_value(self.sweep().await?)?)
    }
}
