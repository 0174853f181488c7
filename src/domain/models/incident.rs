//! Execution incidents: anomaly records with an operator lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{RecordEntity, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acked,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acked => "acked",
            Self::Resolved => "resolved",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "acked" | "ack" | "acknowledged" => Some(Self::Acked),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Open and acknowledged incidents both suppress duplicates.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Acked) | (Self::Open | Self::Acked, Self::Resolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    RetryExhausted,
    AdapterDegraded,
    UnknownStatus,
    WorkerErrors,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryExhausted => "retry_exhausted",
            Self::AdapterDegraded => "adapter_degraded",
            Self::UnknownStatus => "unknown_status",
            Self::WorkerErrors => "worker_errors",
        }
    }
}

/// Timestamped operator note attached on ack/resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentNote {
    pub at: DateTime<Utc>,
    pub status: IncidentStatus,
    #[serde(default)]
    pub actor: Option<String>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionIncident {
    pub id: String,
    pub title: String,
    pub status: IncidentStatus,
    pub incident_type: IncidentType,
    pub source: String,
    pub dedupe_key: String,
    #[serde(default)]
    pub details: Value,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<IncidentNote>,
}

impl RecordEntity for ExecutionIncident {
    const KIND: RecordKind = RecordKind::ExecutionIncident;

    fn record_id(&self) -> &str {
        &self.id
    }
}
