//! Persisted liveness and ownership state for named background workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{RecordEntity, RecordKind};

/// Identity of a leased background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerId {
    ExecutionPoller,
    RetryWorker,
    IncidentScanner,
}

impl WorkerId {
    pub const ALL: [WorkerId; 3] = [
        Self::ExecutionPoller,
        Self::RetryWorker,
        Self::IncidentScanner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionPoller => "execution-poller",
            Self::RetryWorker => "retry-worker",
            Self::IncidentScanner => "incident-scanner",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "execution-poller" | "poller" => Some(Self::ExecutionPoller),
            "retry-worker" | "retry" => Some(Self::RetryWorker),
            "incident-scanner" | "incidents" => Some(Self::IncidentScanner),
            _ => None,
        }
    }

    /// Record id of the persisted lease for this worker.
    pub fn lease_record_id(&self) -> String {
        format!("WLS-{}", self.as_str())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lease record for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLeaseState {
    pub id: String,
    pub worker_id: WorkerId,
    pub running: bool,
    pub interval_ms: u64,
    #[serde(default)]
    pub lease_owner: Option<String>,
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_summary: Option<Value>,
    #[serde(default)]
    pub error_streak: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerLeaseState {
    pub fn new(worker_id: WorkerId, interval_ms: u64) -> Self {
        Self {
            id: worker_id.lease_record_id(),
            worker_id,
            running: false,
            interval_ms,
            lease_owner: None,
            lease_expires_at: None,
            last_run_at: None,
            last_run_summary: None,
            error_streak: 0,
            last_error: None,
            started_at: None,
            stopped_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether a holder other than `owner` currently has an unexpired lease.
    pub fn is_held_by_other(&self, owner: &str, now: DateTime<Utc>) -> bool {
        if !self.running {
            return false;
        }
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(holder), Some(expires_at)) => holder != owner && expires_at > now,
            _ => false,
        }
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.lease_owner.as_deref() == Some(owner)
    }
}

impl RecordEntity for WorkerLeaseState {
    const KIND: RecordKind = RecordKind::WorkerLease;
    const INTERNAL: bool = true;

    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_held_by_other() {
        let now = Utc::now();
        let mut lease = WorkerLeaseState::new(WorkerId::ExecutionPoller, 1000);
        assert!(!lease.is_held_by_other("b", now));

        lease.running = true;
        lease.lease_owner = Some("a".into());
        lease.lease_expires_at = Some(now + Duration::seconds(30));
        assert!(lease.is_held_by_other("b", now));
        assert!(!lease.is_held_by_other("a", now));

        lease.lease_expires_at = Some(now - Duration::seconds(1));
        assert!(!lease.is_held_by_other("b", now));
    }

    #[test]
    fn test_worker_id_roundtrip() {
        for id in WorkerId::ALL {
            assert_eq!(WorkerId::from_str(id.as_str()), Some(id));
        }
        assert_eq!(WorkerId::from_str("retry_worker"), Some(WorkerId::RetryWorker));
    }
}
