//! Execution run CLI commands.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::application::Engine;
use crate::cli::display::{
    colorize_failure_class, colorize_status, detail_lines, flag, list_table, output, render_list,
    timestamp_opt, truncate, CommandOutput,
};
use crate::cli::parse_params;
use crate::cli::types::ExecutionCommands;
use crate::domain::models::{ExecutionMode, ExecutionRun, RunStatus};
use crate::services::PlanExecutionStatus;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunDetailOutput(pub ExecutionRun);

impl CommandOutput for RunDetailOutput {
    fn to_human(&self) -> String {
        let run = &self.0;
        let mut fields = vec![
            ("Status", colorize_status(run.status.as_str()).to_string()),
            ("Robot plan", run.robot_plan_id.clone()),
            ("Adapter", run.adapter_id.clone()),
            ("Mode", run.mode.as_str().to_string()),
            ("Attempt", run.attempt.to_string()),
            ("Started", timestamp_opt(Some(&run.started_at))),
            ("Completed", timestamp_opt(run.completed_at.as_ref())),
        ];
        if let Some(parent) = &run.parent_execution_run_ref {
            fields.push(("Retry of", parent.clone()));
        }
        if let Some(external) = &run.external_run_id {
            fields.push(("External run", external.clone()));
        }
        if let Some(task) = &run.execution_task_id {
            fields.push(("Task", task.clone()));
        }
        if let Some(raw) = &run.last_status_raw {
            fields.push(("Remote status", raw.clone()));
        }
        if let Some(class) = run.failure_class {
            fields.push(("Failure class", colorize_failure_class(class.as_str()).to_string()));
            fields.push(("Failure code", run.failure_code.clone().unwrap_or_default()));
            fields.push(("Reason", run.failure_reason.clone().unwrap_or_default()));
            fields.push(("Retry advised", flag(run.retry_recommended.unwrap_or(false))));
        }
        if run.retry_exhausted {
            fields.push(("Retries", "exhausted".to_string()));
        }
        if let Some(graph) = &run.materialized_event_graph_id {
            fields.push(("Event graph", graph.clone()));
        }
        detail_lines(&format!("Execution run {}", run.id), &fields)
    }
}

#[derive(Debug, Serialize)]
pub struct RunListOutput {
    pub runs: Vec<ExecutionRun>,
    pub total: usize,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "plan", "adapter", "mode", "try", "status", "failure", "started"]);
        for run in &self.runs {
            table.add_row(vec![
                run.id.clone(),
                run.robot_plan_id.clone(),
                run.adapter_id.clone(),
                run.mode.as_str().to_string(),
                run.attempt.to_string(),
                colorize_status(run.status.as_str()).to_string(),
                truncate(run.failure_code.as_deref().unwrap_or("-"), 28),
                timestamp_opt(Some(&run.started_at)),
            ]);
        }
        render_list("execution run", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct PlanStatusOutput(pub PlanExecutionStatus);

impl CommandOutput for PlanStatusOutput {
    fn to_human(&self) -> String {
        let status = &self.0;
        if status.runs.is_empty() {
            return format!("Robot plan {} has not been executed.", status.robot_plan_id);
        }
        let mut table = list_table(&["attempt", "run", "status", "failure"]);
        for digest in &status.runs {
            table.add_row(vec![
                digest.attempt.to_string(),
                digest.id.clone(),
                colorize_status(digest.status.as_str()).to_string(),
                digest.failure_code.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        format!(
            "Robot plan {}: {} attempt(s)\n{table}",
            status.robot_plan_id, status.attempts
        )
    }
}

/// `labexec execute <plan>`
pub async fn submit(
    engine: &Engine,
    robot_plan_id: &str,
    mode: Option<&str>,
    params: Option<&str>,
    json_mode: bool,
) -> Result<()> {
    let mode = mode
        .map(|raw| ExecutionMode::from_str(raw).ok_or_else(|| anyhow!("unknown execution mode: {raw}")))
        .transpose()?;
    let params = parse_params(params)?;

    let run = engine
        .orchestrator
        .execute_robot_plan(robot_plan_id, mode, params)
        .await?;
    output(&RunDetailOutput(run), json_mode);
    Ok(())
}

pub async fn execute(engine: &Engine, command: ExecutionCommands, json_mode: bool) -> Result<()> {
    match command {
        ExecutionCommands::Status { robot_plan_id } => {
            let status = engine.orchestrator.execution_status(&robot_plan_id).await?;
            output(&PlanStatusOutput(status), json_mode);
        }

        ExecutionCommands::Cancel { robot_plan_id } => {
            let run = engine.orchestrator.cancel_robot_plan(&robot_plan_id).await?;
            output(&RunDetailOutput(run), json_mode);
        }

        ExecutionCommands::List { status, limit } => {
            let status = status
                .as_deref()
                .map(|raw| RunStatus::from_str(raw).ok_or_else(|| anyhow!("unknown run status: {raw}")))
                .transpose()?;
            let mut runs = engine.runs.list().await?;
            if let Some(status) = status {
                runs.retain(|run| run.status == status);
            }
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            runs.truncate(limit);
            output(
                &RunListOutput {
                    total: runs.len(),
                    runs,
                },
                json_mode,
            );
        }

        ExecutionCommands::Show { run_id } => {
            let run = engine.runs.require(&run_id).await?.entity;
            output(&RunDetailOutput(run), json_mode);
        }
    }
    Ok(())
}
