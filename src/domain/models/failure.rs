//! Failure taxonomy for execution attempts.

use serde::{Deserialize, Serialize};

use super::execution_run::ExecutionMode;

/// Failure class attached to a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Safe to retry.
    Transient,
    /// Never retry.
    Terminal,
    /// Requires human judgment.
    Unknown,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Terminal => "terminal",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "transient" => Some(Self::Transient),
            "terminal" => Some(Self::Terminal),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Failure codes produced by the classifier and the poller.
pub mod codes {
    pub const TIMEOUT_TEMPORARY: &str = "TIMEOUT_TEMPORARY";
    pub const REMOTE_RUN_NOT_SETTLED: &str = "REMOTE_RUN_NOT_SETTLED";
    pub const PROCESS_FATAL: &str = "PROCESS_FATAL";
    pub const INVALID_PROTOCOL: &str = "INVALID_PROTOCOL";
    pub const GENERIC_EXECUTION_FAILURE: &str = "GENERIC_EXECUTION_FAILURE";
    pub const UNCLASSIFIED: &str = "UNCLASSIFIED";
    pub const STALE_UNKNOWN_STATUS: &str = "STALE_UNKNOWN_STATUS";
    pub const EXECUTOR_EXCEPTION: &str = "EXECUTOR_EXCEPTION";
}

/// Signals observed for a failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSignals {
    pub mode: Option<ExecutionMode>,
    pub exit_code: Option<i32>,
    pub status_raw: Option<String>,
    pub stderr: Option<String>,
}

impl FailureSignals {
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_status_raw(mut self, status_raw: impl Into<String>) -> Self {
        self.status_raw = Some(status_raw.into());
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureClassification {
    pub failure_class: FailureClass,
    pub retry_recommended: bool,
    pub failure_code: String,
    pub reason: String,
}

impl FailureClassification {
    pub fn new(
        failure_class: FailureClass,
        retry_recommended: bool,
        failure_code: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            failure_class,
            retry_recommended,
            failure_code: failure_code.to_string(),
            reason: reason.into(),
        }
    }
}
