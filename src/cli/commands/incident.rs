//! Execution incident CLI commands.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::application::Engine;
use crate::cli::display::{
    action_success, colorize_status, detail_lines, list_table, output, render_list, timestamp_opt,
    truncate, CommandOutput,
};
use crate::cli::types::IncidentCommands;
use crate::domain::models::{ExecutionIncident, IncidentStatus};
use crate::services::{IncidentScanSummary, IncidentSummary};

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ScanOutput(pub IncidentScanSummary);

impl CommandOutput for ScanOutput {
    fn to_human(&self) -> String {
        let scan = &self.0;
        let mut message = action_success(&format!(
            "Scan found {} anomaly(ies): {} new incident(s), {} already tracked",
            scan.detected, scan.created, scan.skipped
        ));
        for id in &scan.created_ids {
            message.push_str(&format!("\n  {id}"));
        }
        message
    }
}

#[derive(Debug, Serialize)]
pub struct IncidentListOutput {
    pub incidents: Vec<ExecutionIncident>,
    pub total: usize,
}

impl CommandOutput for IncidentListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "type", "source", "title", "detected"]);
        for incident in &self.incidents {
            table.add_row(vec![
                incident.id.clone(),
                colorize_status(incident.status.as_str()).to_string(),
                incident.incident_type.as_str().to_string(),
                incident.source.clone(),
                truncate(&incident.title, 48),
                timestamp_opt(Some(&incident.detected_at)),
            ]);
        }
        render_list("incident", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct IncidentDetailOutput(pub ExecutionIncident);

impl CommandOutput for IncidentDetailOutput {
    fn to_human(&self) -> String {
        let incident = &self.0;
        let fields = vec![
            ("Title", incident.title.clone()),
            ("Status", colorize_status(incident.status.as_str()).to_string()),
            ("Type", incident.incident_type.as_str().to_string()),
            ("Source", incident.source.clone()),
            ("Dedupe key", incident.dedupe_key.clone()),
            ("Detected", timestamp_opt(Some(&incident.detected_at))),
            ("Acknowledged", timestamp_opt(incident.acknowledged_at.as_ref())),
            ("Resolved", timestamp_opt(incident.resolved_at.as_ref())),
            ("Details", incident.details.to_string()),
        ];
        let mut rendered = detail_lines(&format!("Incident {}", incident.id), &fields);
        for note in &incident.notes {
            rendered.push_str(&format!(
                "\n  - {} {} {}: {}",
                timestamp_opt(Some(&note.at)),
                note.status.as_str(),
                note.actor.as_deref().unwrap_or("-"),
                note.note
            ));
        }
        rendered
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct SummaryOutput(pub IncidentSummary);

impl CommandOutput for SummaryOutput {
    fn to_human(&self) -> String {
        let summary = &self.0;
        let mut lines = vec![format!(
            "{} incident(s): {} open, {} acked, {} resolved",
            summary.total, summary.open, summary.acked, summary.resolved
        )];
        for (incident_type, count) in &summary.by_type {
            lines.push(format!("  {incident_type:<18} {count}"));
        }
        lines.join("\n")
    }
}

pub async fn execute(engine: &Engine, command: IncidentCommands, json_mode: bool) -> Result<()> {
    match command {
        IncidentCommands::Scan => {
            let scan = engine.incidents.scan().await?;
            output(&ScanOutput(scan), json_mode);
        }

        IncidentCommands::List { status } => {
            let status = status
                .as_deref()
                .map(|raw| {
                    IncidentStatus::from_str(raw).ok_or_else(|| anyhow!("unknown incident status: {raw}"))
                })
                .transpose()?;
            let incidents = engine.incidents.list(status).await?;
            output(
                &IncidentListOutput {
                    total: incidents.len(),
                    incidents,
                },
                json_mode,
            );
        }

        IncidentCommands::Show { incident_id } => {
            let incident = engine.incidents.get(&incident_id).await?;
            output(&IncidentDetailOutput(incident), json_mode);
        }

        IncidentCommands::Ack {
            incident_id,
            actor,
            note,
        } => {
            let incident = engine
                .incidents
                .ack(&incident_id, actor.as_deref(), note.as_deref())
                .await?;
            output(&IncidentDetailOutput(incident), json_mode);
        }

        IncidentCommands::Resolve {
            incident_id,
            actor,
            note,
        } => {
            let incident = engine
                .incidents
                .resolve(&incident_id, actor.as_deref(), note.as_deref())
                .await?;
            output(&IncidentDetailOutput(incident), json_mode);
        }

        IncidentCommands::Summary => {
            let summary = engine.incidents.summary().await?;
            output(&SummaryOutput(summary), json_mode);
        }
    }
    Ok(())
}
