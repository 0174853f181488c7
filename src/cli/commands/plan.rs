//! Robot plan CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::Engine;
use crate::cli::display::{action_success, list_table, output, render_list, CommandOutput};
use crate::cli::types::PlanCommands;
use crate::domain::models::RobotPlan;

/// A plan file holds one plan or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Many(Vec<RobotPlan>),
    One(RobotPlan),
}

#[derive(Debug, Serialize)]
pub struct PlanImportOutput {
    pub success: bool,
    pub imported: Vec<String>,
}

impl CommandOutput for PlanImportOutput {
    fn to_human(&self) -> String {
        action_success(&format!(
            "Imported {} robot plan(s): {}",
            self.imported.len(),
            self.imported.join(", ")
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct PlanListOutput {
    pub plans: Vec<RobotPlan>,
    pub total: usize,
}

impl CommandOutput for PlanListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "platform", "adapter", "mode", "steps"]);
        for plan in &self.plans {
            table.add_row(vec![
                plan.id.clone(),
                plan.target_platform.clone(),
                plan.adapter().to_string(),
                plan.execution_mode.map_or("-", |m| m.as_str()).to_string(),
                plan.instructions.len().to_string(),
            ]);
        }
        render_list("robot plan", &table, self.total)
    }
}

/// Parse a plan file, choosing the format by extension.
pub fn read_plan_file(path: &Path) -> Result<Vec<RobotPlan>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed: PlanFile = if is_json {
        serde_json::from_str(&raw).with_context(|| format!("Invalid plan JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid plan YAML in {}", path.display()))?
    };

    Ok(match parsed {
        PlanFile::Many(plans) => plans,
        PlanFile::One(plan) => vec![plan],
    })
}

pub async fn execute(engine: &Engine, command: PlanCommands, json_mode: bool) -> Result<()> {
    match command {
        PlanCommands::Import { file } => {
            let plans = read_plan_file(&file)?;
            let mut imported = Vec::with_capacity(plans.len());
            for plan in plans {
                engine
                    .store
                    .upsert(&plan, &format!("Import robot plan {}", plan.id))
                    .await?;
                imported.push(plan.id);
            }
            output(&PlanImportOutput { success: true, imported }, json_mode);
        }

        PlanCommands::List { limit } => {
            let plans: Vec<RobotPlan> = engine.store.list(Some(limit)).await?;
            output(
                &PlanListOutput {
                    total: plans.len(),
                    plans,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
