//! Execution task protocol for out-of-process executors.
//!
//! Executors claim queued tasks and report progress with a per-task
//! sequence number. A report whose sequence is not strictly greater than
//! the task's `last_sequence` is acknowledged with `accepted: false` and
//! changes nothing, so executors can safely retry any call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::failure::codes;
use crate::domain::models::{
    new_record_id, ExecutionMode, ExecutionRun, ExecutionTask, FailureClass,
    FailureClassification, FailureSignals, FinalStatus, InstrumentLog, LogEntry,
    PlannedRunState, ProgressAck, RobotPlan, RunStatus, Stored, TaskStatus,
    TASK_CONTRACT_VERSION,
};
use crate::domain::ports::EntityStore;
use crate::services::failure_classifier;
use crate::services::run_completion::RunCompletion;

/// Identifiers returned by [`ExecutionTaskService::create_queued_task`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    pub execution_run_id: String,
    pub task_id: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub executor_id: String,
    pub capabilities: Vec<String>,
    pub max_tasks: usize,
    #[serde(default)]
    pub lease_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub executor_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub progress: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendLogsRequest {
    pub executor_id: String,
    pub sequence: u64,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub executor_id: String,
    pub sequence: u64,
    pub status: TaskStatus,
    #[serde(default)]
    pub failure: Option<Value>,
    #[serde(default)]
    pub external: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub executor_id: String,
    pub sequence: u64,
    pub final_status: FinalStatus,
    #[serde(default)]
    pub artifacts: Vec<Value>,
    #[serde(default)]
    pub measurements: Vec<Value>,
}

const TASK: &str = "execution task";
const DEFAULT_LEASE_MS: u64 = 60_000;

#[derive(Clone)]
pub struct ExecutionTaskService {
    store: EntityStore,
    completion: RunCompletion,
    default_lease_ms: u64,
}

impl ExecutionTaskService {
    pub fn new(store: EntityStore) -> Self {
        Self {
            completion: RunCompletion::new(store.clone()),
            store,
            default_lease_ms: DEFAULT_LEASE_MS,
        }
    }

    pub fn with_default_lease_ms(mut self, lease_ms: u64) -> Self {
        self.default_lease_ms = lease_ms;
        self
    }

    /// Create a running execution run and the queued task that carries it.
    #[instrument(skip(self, runtime_parameters))]
    pub async fn create_queued_task(
        &self,
        robot_plan_id: &str,
        runtime_parameters: Option<Value>,
        parent_execution_run_id: Option<&str>,
    ) -> DomainResult<QueuedTask> {
        let plan = self
            .store
            .require::<RobotPlan>("robot plan", robot_plan_id)
            .await?
            .entity;

        let mut run = ExecutionRun::new(
            new_record_id("EXR"),
            &plan.id,
            plan.adapter(),
            ExecutionMode::RemoteExecutor,
        );
        run.planned_run_id.clone_from(&plan.planned_run_id);
        if let Some(parent_id) = parent_execution_run_id {
            let parent = self.completion.runs().require(parent_id).await?.entity;
            if parent.robot_plan_id != plan.id {
                return Err(DomainError::BadRequest(format!(
                    "execution run {parent_id} belongs to robot plan {}, not {}",
                    parent.robot_plan_id, plan.id
                )));
            }
            run = run.as_retry_of(&parent);
        }
        if let Some(params) = runtime_parameters {
            run.runtime_parameters = params;
        }

        let task = self.build_task(&run.id, &plan, run.runtime_parameters.clone());
        run.execution_task_id = Some(task.id.clone());

        self.completion.runs().create(&run).await?;
        self.store
            .create(&task, &format!("Queue execution task {} for {}", task.id, run.id))
            .await?;
        self.completion
            .planned_runs()
            .propagate(&run, PlannedRunState::Executing)
            .await;

        info!(task_id = %task.id, run_id = %run.id, attempt = run.attempt, "execution task queued");
        Ok(QueuedTask {
            execution_run_id: run.id,
            task_id: task.id,
            attempt: run.attempt,
        })
    }

    /// Queue a task for a run id the caller is about to create.
    pub async fn enqueue(
        &self,
        execution_run_id: &str,
        plan: &RobotPlan,
        runtime_parameters: Value,
    ) -> DomainResult<ExecutionTask> {
        let task = self.build_task(execution_run_id, plan, runtime_parameters);
        self.store
            .create(&task, &format!("Queue execution task {} for {execution_run_id}", task.id))
            .await?;
        info!(task_id = %task.id, run_id = execution_run_id, "execution task queued");
        Ok(task)
    }

    fn build_task(&self, execution_run_id: &str, plan: &RobotPlan, runtime_parameters: Value) -> ExecutionTask {
        let now = Utc::now();
        ExecutionTask {
            id: new_record_id("EXT"),
            execution_run_id: execution_run_id.to_string(),
            robot_plan_id: plan.id.clone(),
            adapter_id: plan.adapter().to_string(),
            target_platform: plan.target_platform.clone(),
            status: TaskStatus::Queued,
            contract_version: TASK_CONTRACT_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            last_sequence: 0,
            runtime_parameters,
            artifact_refs: Vec::new(),
            executor_id: None,
            claimed_at: None,
            lease_expires_at: None,
            claim_count: 0,
            progress: None,
            failure: None,
            external: None,
            final_status: None,
        }
    }

    pub async fn get_task(&self, task_id: &str) -> DomainResult<ExecutionTask> {
        Ok(self.store.require::<ExecutionTask>(TASK, task_id).await?.entity)
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> DomainResult<Vec<ExecutionTask>> {
        let mut tasks: Vec<ExecutionTask> = self.store.list(None).await?;
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        Ok(tasks)
    }

    pub async fn get_logs(&self, task_id: &str) -> DomainResult<Option<InstrumentLog>> {
        Ok(self
            .store
            .get::<InstrumentLog>(&InstrumentLog::id_for_task(task_id))
            .await?
            .map(|s| s.entity))
    }

    /// Claim up to `max_tasks` claimable tasks matching `capabilities`.
    ///
    /// Each claim is a versioned write; a task another executor claimed
    /// first is skipped.
    #[instrument(skip(self, request), fields(executor_id = %request.executor_id))]
    pub async fn claim_tasks(&self, request: &ClaimRequest) -> DomainResult<Vec<ExecutionTask>> {
        if request.executor_id.trim().is_empty() {
            return Err(DomainError::BadRequest("executorId is required".into()));
        }
        if request.max_tasks == 0 {
            return Ok(Vec::new());
        }

        let capabilities: Vec<String> = request
            .capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let matches = |task: &ExecutionTask| {
            capabilities.iter().any(|c| {
                c == "*" || *c == task.adapter_id.to_lowercase() || *c == task.target_platform.to_lowercase()
            })
        };

        let now = Utc::now();
        let mut candidates: Vec<ExecutionTask> = self.store.list(None).await?;
        candidates.retain(|t| t.is_claimable(now) && matches(t));
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let lease = lease_duration(request.lease_duration_ms.unwrap_or(self.default_lease_ms));
        let mut claimed = Vec::new();
        for candidate in candidates {
            if claimed.len() >= request.max_tasks {
                break;
            }
            let Some(mut stored) = self.store.get::<ExecutionTask>(&candidate.id).await? else {
                continue;
            };
            let now = Utc::now();
            if !stored.entity.is_claimable(now) {
                continue;
            }
            if self.run_settled(&stored.entity.execution_run_id).await? {
                debug!(
                    task_id = %candidate.id,
                    run_id = %stored.entity.execution_run_id,
                    "skipping task whose run already settled"
                );
                continue;
            }

            let task = &mut stored.entity;
            if task.status != TaskStatus::Queued {
                warn!(
                    task_id = %task.id,
                    previous_executor = task.executor_id.as_deref().unwrap_or(""),
                    "reclaiming task with expired claim lease"
                );
            }
            task.status = TaskStatus::Claimed;
            task.executor_id = Some(request.executor_id.clone());
            task.claimed_at = Some(now);
            task.lease_expires_at = Some(now + lease);
            task.claim_count += 1;
            task.updated_at = now;

            match self
                .store
                .save(task, Some(stored.version), &format!("Claim {} by {}", task.id, request.executor_id))
                .await
            {
                Ok(_) => claimed.push(stored.entity),
                Err(DomainError::Conflict { .. }) => {
                    debug!(task_id = %candidate.id, "claim lost to concurrent writer");
                }
                Err(e) => return Err(e),
            }
        }

        if !claimed.is_empty() {
            info!(count = claimed.len(), "execution tasks claimed");
        }
        Ok(claimed)
    }

    async fn run_settled(&self, run_id: &str) -> DomainResult<bool> {
        Ok(self
            .completion
            .runs()
            .get(run_id)
            .await?
            .is_some_and(|run| run.entity.status.is_terminal()))
    }

    /// Close a task that has not finished yet as canceled.
    ///
    /// Queued tasks can no longer be claimed; an executor already holding
    /// the task has its next report refused. A task that already finished
    /// is returned unchanged.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str, reason: &str) -> DomainResult<ExecutionTask> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut stored = self.store.require::<ExecutionTask>(TASK, task_id).await?;
            let task = &mut stored.entity;
            if task.final_status.is_some() {
                return Ok(stored.entity);
            }

            task.status = FinalStatus::Canceled.task_status();
            task.final_status = Some(FinalStatus::Canceled);
            task.lease_expires_at = None;
            task.failure = Some(json!({"message": reason}));
            task.updated_at = Utc::now();
            match self
                .store
                .save(task, Some(stored.version), &format!("Cancel {task_id}"))
                .await
            {
                Ok(_) => {
                    info!(task_id, "execution task canceled");
                    return Ok(stored.entity);
                }
                // An executor report landed in between; decide again on the fresh copy.
                Err(DomainError::Conflict { .. }) if attempt < 3 => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Load a task for a sequenced report. `Ok(Err(ack))` means the report
    /// is a duplicate or arrived after completion and must not be applied.
    async fn gate(
        &self,
        task_id: &str,
        executor_id: &str,
        sequence: u64,
    ) -> DomainResult<Result<Stored<ExecutionTask>, ProgressAck>> {
        let stored = self.store.require::<ExecutionTask>(TASK, task_id).await?;
        let task = &stored.entity;

        if task.executor_id.as_deref() != Some(executor_id) {
            return Err(DomainError::ExecutorMismatch {
                task_id: task_id.to_string(),
                claimed_by: task.executor_id.clone().unwrap_or_else(|| "nobody".to_string()),
                executor_id: executor_id.to_string(),
            });
        }
        if sequence <= task.last_sequence || task.final_status.is_some() {
            debug!(
                task_id,
                sequence,
                last_sequence = task.last_sequence,
                "rejecting stale progress report"
            );
            return Ok(Err(ack(task, false)));
        }
        Ok(Ok(stored))
    }

    async fn commit(&self, stored: &mut Stored<ExecutionTask>, sequence: u64, message: &str) -> DomainResult<()> {
        stored.entity.last_sequence = sequence;
        stored.entity.updated_at = Utc::now();
        stored.version = self
            .store
            .save(&stored.entity, Some(stored.version), message)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(executor_id = %request.executor_id, sequence = request.sequence))]
    pub async fn heartbeat(&self, task_id: &str, request: &HeartbeatRequest) -> DomainResult<ProgressAck> {
        let status = request.status.unwrap_or(TaskStatus::Running);
        if !matches!(status, TaskStatus::Claimed | TaskStatus::Running) {
            return Err(DomainError::BadRequest(format!(
                "heartbeat status must be claimed or running, got {}",
                status.as_str()
            )));
        }

        let mut stored = match self.gate(task_id, &request.executor_id, request.sequence).await? {
            Ok(stored) => stored,
            Err(rejected) => return Ok(rejected),
        };
        let task = &mut stored.entity;
        if !task.status.is_terminal() {
            task.status = status;
        }
        if let Some(progress) = &request.progress {
            task.progress = Some(progress.clone());
        }
        extend_claim_lease(task, Utc::now());

        self.commit(&mut stored, request.sequence, &format!("Heartbeat {task_id}#{}", request.sequence))
            .await?;
        Ok(ack(&stored.entity, true))
    }

    /// Append executor log lines.
    ///
    /// The log is written before the task's sequence moves, so a report
    /// whose log write failed can be retried with the same sequence. The
    /// log remembers the last sequence it took, so such a retry never
    /// appends twice.
    #[instrument(skip(self, request), fields(executor_id = %request.executor_id, sequence = request.sequence))]
    pub async fn append_logs(&self, task_id: &str, request: &AppendLogsRequest) -> DomainResult<ProgressAck> {
        let mut stored = match self.gate(task_id, &request.executor_id, request.sequence).await? {
            Ok(stored) => stored,
            Err(rejected) => return Ok(rejected),
        };

        let now = Utc::now();
        let entries = request.entries.iter().cloned().map(|mut entry| {
            entry.timestamp.get_or_insert(now);
            entry
        });

        let log_id = InstrumentLog::id_for_task(task_id);
        match self.store.get::<InstrumentLog>(&log_id).await? {
            Some(log) if log.entity.last_sequence >= request.sequence => {
                debug!(task_id, sequence = request.sequence, "log entries already stored");
            }
            Some(mut log) => {
                log.entity.entries.extend(entries);
                log.entity.last_sequence = request.sequence;
                log.entity.updated_at = now;
                self.store
                    .save(&log.entity, Some(log.version), &format!("Append logs to {log_id}"))
                    .await?;
            }
            None => {
                let log = InstrumentLog {
                    id: log_id.clone(),
                    task_id: task_id.to_string(),
                    execution_run_id: stored.entity.execution_run_id.clone(),
                    entries: entries.collect(),
                    last_sequence: request.sequence,
                    updated_at: now,
                };
                self.store.create(&log, &format!("Create {log_id}")).await?;
            }
        }

        extend_claim_lease(&mut stored.entity, Utc::now());
        self.commit(&mut stored, request.sequence, &format!("Logs {task_id}#{}", request.sequence))
            .await?;
        Ok(ack(&stored.entity, true))
    }

    #[instrument(skip(self, request), fields(executor_id = %request.executor_id, sequence = request.sequence))]
    pub async fn update_status(&self, task_id: &str, request: &StatusUpdateRequest) -> DomainResult<ProgressAck> {
        if request.status == TaskStatus::Queued {
            return Err(DomainError::BadRequest("tasks cannot be re-queued by an executor".into()));
        }

        let mut stored = match self.gate(task_id, &request.executor_id, request.sequence).await? {
            Ok(stored) => stored,
            Err(rejected) => return Ok(rejected),
        };
        let task = &mut stored.entity;
        task.status = request.status;
        if request.failure.is_some() {
            task.failure.clone_from(&request.failure);
        }
        if request.external.is_some() {
            task.external.clone_from(&request.external);
        }
        extend_claim_lease(task, Utc::now());
        if let Some(external) = &request.external {
            self.record_external_ids(&stored.entity.execution_run_id, external).await?;
        }
        self.commit(
            &mut stored,
            request.sequence,
            &format!("Status {task_id} {}#{}", request.status.as_str(), request.sequence),
        )
        .await?;
        Ok(ack(&stored.entity, true))
    }

    async fn record_external_ids(&self, run_id: &str, external: &Value) -> DomainResult<()> {
        let run_ref = first_str(external, &["externalRunId", "runId"]);
        let protocol_ref = first_str(external, &["externalProtocolId", "protocolId"]);
        if run_ref.is_none() && protocol_ref.is_none() {
            return Ok(());
        }
        self.completion
            .runs()
            .update(run_id, &format!("Record external ids for {run_id}"), |run| {
                if run_ref.is_some() {
                    run.external_run_id = run_ref;
                }
                if protocol_ref.is_some() {
                    run.external_protocol_id = protocol_ref;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Finish a task and move its execution run to the matching terminal status.
    ///
    /// The run is settled before the task is closed: if closing the task
    /// fails, the executor retries with the same sequence and the already
    /// settled run is left as it is.
    #[instrument(skip(self, request), fields(executor_id = %request.executor_id, sequence = request.sequence))]
    pub async fn complete(&self, task_id: &str, request: &CompleteRequest) -> DomainResult<ProgressAck> {
        let mut stored = match self.gate(task_id, &request.executor_id, request.sequence).await? {
            Ok(stored) => stored,
            Err(rejected) => return Ok(rejected),
        };
        self.finish_run(&stored.entity, request).await?;

        let task = &mut stored.entity;
        task.status = request.final_status.task_status();
        task.final_status = Some(request.final_status);
        task.lease_expires_at = None;
        task.artifact_refs.extend(request.artifacts.iter().cloned());
        self.commit(&mut stored, request.sequence, &format!("Complete {task_id}#{}", request.sequence))
            .await?;
        info!(task_id, final_status = ?request.final_status, "execution task completed");
        Ok(ack(&stored.entity, true))
    }

    async fn finish_run(&self, task: &ExecutionTask, request: &CompleteRequest) -> DomainResult<()> {
        let mut run = self.completion.runs().require(&task.execution_run_id).await?;
        if run.entity.status.is_terminal() {
            warn!(
                run_id = %run.entity.id,
                status = run.entity.status.as_str(),
                "execution run already terminal, recording task outcome only"
            );
            return Ok(());
        }

        run.entity.artifacts.extend(request.artifacts.iter().cloned());
        run.entity.measurements.extend(request.measurements.iter().cloned());
        run.entity.last_status_raw = Some(request.final_status.task_status().as_str().to_string());

        let status = request.final_status.run_status();
        let classification = (status == RunStatus::Failed).then(|| classify_task_failure(task));
        self.completion
            .finish(
                run,
                status,
                classification.as_ref(),
                &format!("Task {} completed {:?}", task.id, request.final_status),
            )
            .await?;
        Ok(())
    }
}

fn ack(task: &ExecutionTask, accepted: bool) -> ProgressAck {
    ProgressAck {
        accepted,
        task_id: task.id.clone(),
        last_sequence: task.last_sequence,
        status: task.status,
    }
}

fn lease_duration(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000))
}

/// Push an active claim lease forward by its original length.
fn extend_claim_lease(task: &mut ExecutionTask, now: DateTime<Utc>) {
    if let (Some(claimed_at), Some(expires_at)) = (task.claimed_at, task.lease_expires_at) {
        let length = expires_at - claimed_at;
        if length > Duration::zero() {
            task.lease_expires_at = Some(now + length);
        }
    }
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Classification for a failed task: the executor's hint when it carries
/// one, otherwise the classifier on the failure message.
pub fn classify_task_failure(task: &ExecutionTask) -> FailureClassification {
    let hint = task.failure.as_ref();
    let message = hint
        .and_then(|f| first_str(f, &["message", "reason"]))
        .unwrap_or_else(|| "executor reported failure".to_string());

    if let Some(class) = hint
        .and_then(|f| first_str(f, &["class", "failureClass"]))
        .and_then(|c| FailureClass::from_str(&c))
    {
        let code = hint
            .and_then(|f| first_str(f, &["code", "failureCode"]))
            .unwrap_or_else(|| codes::GENERIC_EXECUTION_FAILURE.to_string());
        return FailureClassification {
            failure_class: class,
            retry_recommended: class == FailureClass::Transient,
            failure_code: code,
            reason: message,
        };
    }

    failure_classifier::classify(
        &FailureSignals::default()
            .with_mode(ExecutionMode::RemoteExecutor)
            .with_status_raw("failed")
            .with_stderr(message),
    )
}
