//! Wire contract types for adapter bridges.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Contract version accepted in strict mode.
pub const BRIDGE_CONTRACT_VERSION: &str = "bridge-contract/v1";

/// Operation a bridge response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeOperation {
    Submit,
    Status,
    Cancel,
    ActiveRead,
}

impl BridgeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Status => "status",
            Self::Cancel => "cancel",
            Self::ActiveRead => "active_read",
        }
    }

    /// Fields the `result` object must carry for this operation.
    pub fn required_result_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Submit => &["runId", "status"],
            Self::Status | Self::Cancel => &["status"],
            Self::ActiveRead => &["rawDataPath"],
        }
    }

    /// Human-readable expected envelope, used in contract errors.
    pub fn expected_shape(&self) -> String {
        let fields = self
            .required_result_fields()
            .iter()
            .map(|f| format!("{f}:string"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{{contractVersion:\"{BRIDGE_CONTRACT_VERSION}\", adapterId, operation:\"{}\", result:{{{fields}}}}}",
            self.as_str()
        )
    }
}

/// Versioned envelope returned by bridges in strict mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeContractEnvelope {
    pub contract_version: String,
    pub adapter_id: String,
    pub operation: BridgeOperation,
    pub result: Value,
}

/// Normalised view of a bridge response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedBridgeResponse {
    pub operation: BridgeOperation,
    pub run_id: Option<String>,
    pub raw_data_path: Option<String>,
    pub status: Option<String>,
    pub contract_version: Option<String>,
    pub adapter_id: Option<String>,
    /// Set when recovered through best-effort field extraction.
    pub legacy: bool,
}

/// Remote run state after normalising a bridge status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteRunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Stopped,
    Unknown,
}

impl RemoteRunState {
    /// Map a raw bridge status onto the remote run state.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "queued" | "pending" | "idle" | "accepted" | "submitted" | "created" => Self::Queued,
            "running" | "in_progress" | "started" | "paused" | "finishing" | "awaiting_recovery" => {
                Self::Running
            }
            "succeeded" | "success" | "completed" | "complete" | "finished" | "done" => {
                Self::Succeeded
            }
            "failed" | "error" | "errored" => Self::Failed,
            "stopped" | "stop_requested" | "canceled" | "cancelled" | "aborted" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }

    /// Whether the remote run has not settled yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_status() {
        assert_eq!(RemoteRunState::normalize("Succeeded"), RemoteRunState::Succeeded);
        assert_eq!(RemoteRunState::normalize("stop-requested"), RemoteRunState::Stopped);
        assert_eq!(RemoteRunState::normalize("in progress"), RemoteRunState::Running);
        assert_eq!(RemoteRunState::normalize("mystery"), RemoteRunState::Unknown);
    }

    #[test]
    fn test_expected_shape_names_fields() {
        let shape = BridgeOperation::Submit.expected_shape();
        assert!(shape.contains("runId"));
        assert!(shape.contains("\"submit\""));
    }
}
