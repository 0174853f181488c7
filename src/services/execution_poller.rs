//! Reconciles running execution runs against their bridges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::backends::BackendRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::failure::codes;
use crate::domain::models::{
    ExecutionConfig, ExecutionRun, FailureClass, FailureClassification, FailureSignals,
    RemoteRunState, RunStatus, Stored, WorkerId,
};
use crate::domain::ports::{RemoteStatus, WorkerUnit};
use crate::services::failure_classifier::classify;
use crate::services::run_completion::RunCompletion;

/// Counts by outcome for one poller tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    pub stale_unknown_failed: usize,
    pub timed_out: usize,
    pub still_running: usize,
    /// Runs another writer changed while they were being reconciled.
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Completed,
    Failed,
    Canceled,
    StaleUnknownFailed,
    TimedOut,
    StillRunning,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerPolicy {
    /// 0 disables the run timeout.
    pub max_run_duration_ms: u64,
    pub stale_unknown_ms: u64,
}

impl From<&ExecutionConfig> for PollerPolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_run_duration_ms: config.max_run_duration_ms,
            stale_unknown_ms: config.stale_unknown_ms,
        }
    }
}

pub struct ExecutionPoller {
    completion: RunCompletion,
    backends: BackendRegistry,
    policy: PollerPolicy,
}

impl ExecutionPoller {
    pub fn new(completion: RunCompletion, backends: BackendRegistry, policy: PollerPolicy) -> Self {
        Self {
            completion,
            backends,
            policy,
        }
    }

    /// Reconcile every running run once.
    pub async fn poll_all(&self) -> DomainResult<PollSummary> {
        let running = self.completion.runs().list_running().await?;
        let mut summary = PollSummary::default();

        for run in running {
            summary.polled += 1;
            match self.poll_run(&run.id, Utc::now()).await {
                Ok(outcome) => tally(&mut summary, outcome),
                Err(DomainError::Conflict { .. }) => {
                    debug!(run_id = %run.id, "run changed during reconciliation, skipping");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(run_id = %run.id, mode = run.mode.as_str(), error = %e, "failed to reconcile run");
                    summary.errors += 1;
                }
            }
        }

        if summary.polled > 0 {
            info!(
                polled = summary.polled,
                completed = summary.completed,
                failed = summary.failed,
                stale_unknown_failed = summary.stale_unknown_failed,
                timed_out = summary.timed_out,
                errors = summary.errors,
                "poll tick finished"
            );
        }
        Ok(summary)
    }

    async fn poll_run(&self, run_id: &str, now: DateTime<Utc>) -> DomainResult<PollOutcome> {
        let Some(mut stored) = self.completion.runs().get(run_id).await? else {
            return Ok(PollOutcome::Skipped);
        };
        if stored.entity.status != RunStatus::Running {
            return Ok(PollOutcome::Skipped);
        }

        if self.timed_out(&stored.entity, now) {
            stored.entity.last_status_raw = Some("timeout".to_string());
            stored.entity.last_polled_at = Some(now);
            let classification = classify(
                &FailureSignals::default()
                    .with_mode(stored.entity.mode)
                    .with_status_raw("timeout"),
            );
            warn!(run_id, max_run_duration_ms = self.policy.max_run_duration_ms, "execution run timed out");
            self.completion
                .finish(stored, RunStatus::Failed, Some(&classification), "Execution run timed out")
                .await?;
            return Ok(PollOutcome::TimedOut);
        }

        let backend = self.backends.get(stored.entity.mode)?;
        let remote = backend.status(&stored.entity).await?;
        debug!(run_id, status_raw = %remote.status_raw, state = ?remote.state, "remote status");

        apply_observation(&mut stored.entity, &remote, now);
        match remote.state {
            RemoteRunState::Succeeded => {
                self.completion
                    .finish(stored, RunStatus::Completed, None, "Execution run completed")
                    .await?;
                Ok(PollOutcome::Completed)
            }
            RemoteRunState::Failed => {
                let classification = classify(&signals_for(&stored.entity, &remote));
                self.completion
                    .finish(stored, RunStatus::Failed, Some(&classification), "Execution run failed")
                    .await?;
                Ok(PollOutcome::Failed)
            }
            RemoteRunState::Stopped => {
                self.completion
                    .finish(stored, RunStatus::Canceled, None, "Execution run stopped at bridge")
                    .await?;
                Ok(PollOutcome::Canceled)
            }
            RemoteRunState::Unknown => self.handle_unknown(stored, now).await,
            RemoteRunState::Queued | RemoteRunState::Running => {
                stored.entity.unknown_status_since = None;
                self.completion.runs().save(&stored, "Record poll").await?;
                Ok(PollOutcome::StillRunning)
            }
        }
    }

    async fn handle_unknown(&self, mut stored: Stored<ExecutionRun>, now: DateTime<Utc>) -> DomainResult<PollOutcome> {
        let since = stored
            .entity
            .unknown_status_since
            .unwrap_or(stored.entity.started_at);
        let unknown_for = now.signed_duration_since(since).num_milliseconds();

        if unknown_for > ms_i64(self.policy.stale_unknown_ms) {
            let classification = FailureClassification::new(
                FailureClass::Unknown,
                false,
                codes::STALE_UNKNOWN_STATUS,
                format!(
                    "remote status {:?} unrecognised for {unknown_for}ms",
                    stored.entity.last_status_raw.as_deref().unwrap_or("")
                ),
            );
            warn!(run_id = %stored.entity.id, unknown_for_ms = unknown_for, "failing run stuck at unknown status");
            self.completion
                .finish(stored, RunStatus::Failed, Some(&classification), "Unknown status went stale")
                .await?;
            return Ok(PollOutcome::StaleUnknownFailed);
        }

        if stored.entity.unknown_status_since.is_none() {
            stored.entity.unknown_status_since = Some(now);
        }
        self.completion.runs().save(&stored, "Record unknown status").await?;
        Ok(PollOutcome::StillRunning)
    }

    fn timed_out(&self, run: &ExecutionRun, now: DateTime<Utc>) -> bool {
        self.policy.max_run_duration_ms > 0
            && now.signed_duration_since(run.started_at).num_milliseconds()
                > ms_i64(self.policy.max_run_duration_ms)
    }
}

fn apply_observation(run: &mut ExecutionRun, remote: &RemoteStatus, now: DateTime<Utc>) {
    run.last_status_raw = Some(remote.status_raw.clone());
    run.last_polled_at = Some(now);
    if remote.raw_data_path.is_some() {
        run.raw_data_path.clone_from(&remote.raw_data_path);
    }
    if remote.exit_code.is_some() {
        run.last_exit_code = remote.exit_code;
    }
    if remote.stderr.is_some() {
        run.last_stderr.clone_from(&remote.stderr);
    }
}

fn signals_for(run: &ExecutionRun, remote: &RemoteStatus) -> FailureSignals {
    let mut signals = FailureSignals::default()
        .with_mode(run.mode)
        .with_status_raw(&remote.status_raw);
    signals.exit_code = remote.exit_code;
    signals.stderr.clone_from(&remote.stderr);
    signals
}

fn tally(summary: &mut PollSummary, outcome: PollOutcome) {
    match outcome {
        PollOutcome::Completed => summary.completed += 1,
        PollOutcome::Failed => summary.failed += 1,
        PollOutcome::Canceled => summary.canceled += 1,
        PollOutcome::StaleUnknownFailed => summary.stale_unknown_failed += 1,
        PollOutcome::TimedOut => summary.timed_out += 1,
        PollOutcome::StillRunning => summary.still_running += 1,
        PollOutcome::Skipped => summary.skipped += 1,
    }
}

fn ms_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Worker unit wrapping the poller.
pub struct ExecutionPollerWorker {
    poller: Arc<ExecutionPoller>,
}

impl ExecutionPollerWorker {
    pub fn new(poller: Arc<ExecutionPoller>) -> Self {
        Self { poller }
    }
}

#[async_trait]
impl WorkerUnit for ExecutionPollerWorker {
    fn worker_id(&self) -> WorkerId {
        WorkerId::ExecutionPoller
    }

    async fn run_tick(&self) -> DomainResult<Value> {
        let summary = self.poller.poll_all().await?;
        Ok(serde_json::to_value(summary)?)
    }
}
