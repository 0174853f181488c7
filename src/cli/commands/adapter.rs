//! Adapter CLI commands.

use anyhow::Result;
use serde::Serialize;

use crate::application::Engine;
use crate::cli::display::{
    colorize_status, flag, list_table, output, render_list, timestamp_opt, truncate, CommandOutput,
};
use crate::cli::types::AdapterCommands;
use crate::domain::models::AdapterHealth;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterRow {
    pub adapter_id: String,
    pub mode: String,
    pub simulate: bool,
    pub endpoint: Option<String>,
    pub health: Option<AdapterHealth>,
}

#[derive(Debug, Serialize)]
pub struct AdapterListOutput {
    pub adapters: Vec<AdapterRow>,
}

impl CommandOutput for AdapterListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["adapter", "mode", "simulate", "endpoint", "health", "checked"]);
        for row in &self.adapters {
            let health = row.health.as_ref();
            table.add_row(vec![
                row.adapter_id.clone(),
                row.mode.clone(),
                flag(row.simulate),
                truncate(row.endpoint.as_deref().unwrap_or("-"), 48),
                health.map_or_else(|| "-".to_string(), |h| colorize_status(h.status.as_str()).to_string()),
                timestamp_opt(health.map(|h| &h.checked_at)),
            ]);
        }
        render_list("adapter", &table, self.adapters.len())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthOutput {
    pub results: Vec<AdapterHealth>,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["adapter", "status", "detail"]);
        for health in &self.results {
            table.add_row(vec![
                health.adapter_id.clone(),
                colorize_status(health.status.as_str()).to_string(),
                truncate(health.detail.as_deref().unwrap_or(""), 60),
            ]);
        }
        render_list("adapter", &table, self.results.len())
    }
}

pub async fn execute(engine: &Engine, command: AdapterCommands, json_mode: bool) -> Result<()> {
    match command {
        AdapterCommands::List => {
            let health: Vec<AdapterHealth> = engine.store.list(None).await?;
            let adapters = engine
                .config
                .adapters
                .iter()
                .map(|(adapter_id, config)| AdapterRow {
                    adapter_id: adapter_id.clone(),
                    mode: config.effective_mode().as_str().to_string(),
                    simulate: config.simulate,
                    endpoint: config.base_url.clone().or_else(|| config.sidecar_command.clone()),
                    health: health.iter().find(|h| &h.adapter_id == adapter_id).cloned(),
                })
                .collect();
            output(&AdapterListOutput { adapters }, json_mode);
        }

        AdapterCommands::Health => {
            let results = engine.orchestrator.probe_adapter_health().await?;
            output(&HealthOutput { results }, json_mode);
        }
    }
    Ok(())
}
