//! Execution task CLI commands.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::application::Engine;
use crate::cli::display::{
    action_success, colorize_status, detail_lines, list_table, output, render_list, timestamp_opt,
    CommandOutput,
};
use crate::cli::parse_params;
use crate::cli::types::TaskCommands;
use crate::domain::models::{ExecutionTask, InstrumentLog, TaskStatus};
use crate::services::task_service::QueuedTask;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct QueuedOutput(pub QueuedTask);

impl CommandOutput for QueuedOutput {
    fn to_human(&self) -> String {
        action_success(&format!(
            "Queued task {} for run {} (attempt {})",
            self.0.task_id, self.0.execution_run_id, self.0.attempt
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<ExecutionTask>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "run", "adapter", "status", "executor", "seq", "claims"]);
        for task in &self.tasks {
            table.add_row(vec![
                task.id.clone(),
                task.execution_run_id.clone(),
                task.adapter_id.clone(),
                colorize_status(task.status.as_str()).to_string(),
                task.executor_id.clone().unwrap_or_else(|| "-".to_string()),
                task.last_sequence.to_string(),
                task.claim_count.to_string(),
            ]);
        }
        render_list("execution task", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TaskDetailOutput(pub ExecutionTask);

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let task = &self.0;
        let mut fields = vec![
            ("Status", colorize_status(task.status.as_str()).to_string()),
            ("Run", task.execution_run_id.clone()),
            ("Robot plan", task.robot_plan_id.clone()),
            ("Adapter", task.adapter_id.clone()),
            ("Platform", task.target_platform.clone()),
            ("Contract", task.contract_version.clone()),
            ("Executor", task.executor_id.clone().unwrap_or_else(|| "-".to_string())),
            ("Claimed", timestamp_opt(task.claimed_at.as_ref())),
            ("Lease until", timestamp_opt(task.lease_expires_at.as_ref())),
            ("Claims", task.claim_count.to_string()),
            ("Last sequence", task.last_sequence.to_string()),
        ];
        if let Some(progress) = &task.progress {
            fields.push(("Progress", progress.to_string()));
        }
        if let Some(failure) = &task.failure {
            fields.push(("Failure", failure.to_string()));
        }
        if let Some(external) = &task.external {
            fields.push(("External", external.to_string()));
        }
        detail_lines(&format!("Execution task {}", task.id), &fields)
    }
}

#[derive(Debug, Serialize)]
pub struct TaskLogsOutput {
    pub task_id: String,
    pub log: Option<InstrumentLog>,
}

impl CommandOutput for TaskLogsOutput {
    fn to_human(&self) -> String {
        let Some(log) = self.log.as_ref().filter(|log| !log.entries.is_empty()) else {
            return format!("No log entries for task {}.", self.task_id);
        };
        log.entries
            .iter()
            .map(|entry| {
                let code = entry.code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default();
                format!(
                    "{} {:<5}{} {}",
                    timestamp_opt(entry.timestamp.as_ref()),
                    entry.level.to_uppercase(),
                    code,
                    entry.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub async fn execute(engine: &Engine, command: TaskCommands, json_mode: bool) -> Result<()> {
    match command {
        TaskCommands::Queue {
            robot_plan_id,
            params,
            parent,
        } => {
            let params = parse_params(params.as_deref())?;
            let queued = engine
                .tasks
                .create_queued_task(&robot_plan_id, params, parent.as_deref())
                .await?;
            output(&QueuedOutput(queued), json_mode);
        }

        TaskCommands::List { status } => {
            let status = status
                .as_deref()
                .map(|raw| TaskStatus::from_str(raw).ok_or_else(|| anyhow!("unknown task status: {raw}")))
                .transpose()?;
            let tasks = engine.tasks.list_tasks(status).await?;
            output(
                &TaskListOutput {
                    total: tasks.len(),
                    tasks,
                },
                json_mode,
            );
        }

        TaskCommands::Show { task_id } => {
            let task = engine.tasks.get_task(&task_id).await?;
            output(&TaskDetailOutput(task), json_mode);
        }

        TaskCommands::Logs { task_id } => {
            // Existence check so a typo is not reported as an empty log.
            engine.tasks.get_task(&task_id).await?;
            let log = engine.tasks.get_logs(&task_id).await?;
            output(&TaskLogsOutput { task_id, log }, json_mode);
        }
    }
    Ok(())
}
