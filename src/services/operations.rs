//! Combined operations snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AdapterHealth, ExecutionIncident, IncidentStatus, WorkerLeaseState};
use crate::domain::ports::EntityStore;
use crate::services::execution_run_store::ExecutionRunStore;
use crate::services::retry_worker::ExecutionRetryWorker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_runs: usize,
    /// Run counts keyed by status.
    pub runs_by_status: BTreeMap<String, usize>,
    pub retry_candidates: usize,
    pub open_incidents: usize,
    pub adapter_health_records: usize,
    pub unhealthy_adapters: usize,
    pub worker_leases: usize,
    pub running_workers: usize,
}

#[derive(Clone)]
pub struct OperationsService {
    store: EntityStore,
    runs: ExecutionRunStore,
}

impl OperationsService {
    pub fn new(store: EntityStore) -> Self {
        Self {
            runs: ExecutionRunStore::new(store.clone()),
            store,
        }
    }

    pub async fn snapshot(&self) -> DomainResult<OperationsSnapshot> {
        let runs = self.runs.list().await?;
        let mut runs_by_status = BTreeMap::new();
        for run in &runs {
            *runs_by_status.entry(run.status.as_str().to_string()).or_insert(0) += 1;
        }

        let incidents: Vec<ExecutionIncident> = self.store.list(None).await?;
        let health: Vec<AdapterHealth> = self.store.list(None).await?;
        let leases: Vec<WorkerLeaseState> = self.store.list(None).await?;

        Ok(OperationsSnapshot {
            generated_at: Utc::now(),
            total_runs: runs.len(),
            runs_by_status,
            retry_candidates: ExecutionRetryWorker::candidates(&runs).len(),
            open_incidents: incidents
                .iter()
                .filter(|incident| incident.status == IncidentStatus::Open)
                .count(),
            adapter_health_records: health.len(),
            unhealthy_adapters: health.iter().filter(|h| h.status.is_unhealthy()).count(),
            worker_leases: leases.len(),
            running_workers: leases.iter().filter(|lease| lease.running).count(),
        })
    }
}
