//! Domain errors for the labexec execution engine.

use thiserror::Error;

/// Domain-level errors surfaced to callers of the execution engine.
///
/// Every variant maps to a stable machine code and an HTTP-style status so
/// the API layer can render it without inspecting the message.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to create {entity} {id}: {reason}")]
    CreateFailed {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Failed to update {entity} {id}: {reason}")]
    UpdateFailed {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Concurrency conflict: record {id} is at version {actual}, expected {expected}")]
    Conflict { id: String, expected: i64, actual: i64 },

    #[error("Task {task_id} is claimed by {claimed_by}, not {executor_id}")]
    ExecutorMismatch {
        task_id: String,
        claimed_by: String,
        executor_id: String,
    },

    #[error("Bridge contract violation: {0}")]
    ContractViolation(#[from] ContractError),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::CreateFailed { .. } => "CREATE_FAILED",
            Self::UpdateFailed { .. } => "UPDATE_FAILED",
            Self::Conflict { .. } => "CONFLICT",
            Self::ExecutorMismatch { .. } => "EXECUTOR_MISMATCH",
            Self::ContractViolation(_) => "CONTRACT_VIOLATION",
            Self::Store(_) => "STORE_ERROR",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// HTTP-style status for the API layer.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::BadRequest(_) => 400,
            Self::Conflict { .. } | Self::ExecutorMismatch { .. } => 409,
            Self::ContractViolation(_) | Self::ExecutionFailed(_) => 502,
            Self::CreateFailed { .. }
            | Self::UpdateFailed { .. }
            | Self::Store(_)
            | Self::Serialization(_) => 500,
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

/// A bridge response that matched neither the versioned contract nor the
/// legacy field layout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("{operation} response is not valid JSON: {reason}")]
    InvalidJson { operation: String, reason: String },

    #[error("{operation} response does not match contract: expected {expected} ({reason})")]
    ShapeMismatch {
        operation: String,
        expected: String,
        reason: String,
    },

    #[error("{operation} response uses unsupported contract version {version}")]
    UnsupportedVersion { operation: String, version: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let err = DomainError::not_found("execution run", "EXR-1");
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.to_string(), "execution run not found: EXR-1");

        let err = DomainError::BadRequest("missing executorId".into());
        assert_eq!(err.http_status(), 400);

        let err: DomainError = ContractError::UnsupportedVersion {
            operation: "status".into(),
            version: "v9".into(),
        }
        .into();
        assert_eq!(err.code(), "CONTRACT_VIOLATION");
        assert_eq!(err.http_status(), 502);
    }
}
