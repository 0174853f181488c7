//! Execution incidents: anomaly scanning and the operator lifecycle.
//!
//! Each anomaly maps to a dedupe key. Keys scoped to a single run
//! (`retry-exhausted:`, `unknown-status:`) are raised at most once, since
//! the run they describe never changes again. Keys describing a condition
//! (`adapter-health:`, `worker-errors:`) are suppressed only while an
//! incident for them is open or acked, so a recurrence after resolution
//! opens a fresh incident.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::failure::codes;
use crate::domain::models::{
    new_record_id, AdapterHealth, ExecutionIncident, ExecutionRun, IncidentNote, IncidentStatus,
    IncidentType, RunStatus, WorkerId, WorkerLeaseState,
};
use crate::domain::ports::{EntityStore, WorkerUnit};

const ENTITY: &str = "execution incident";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentScanSummary {
    pub detected: usize,
    pub created: usize,
    pub skipped: usize,
    pub created_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub total: usize,
    pub open: usize,
    pub acked: usize,
    pub resolved: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// An anomaly found by a scan, before deduplication.
#[derive(Debug, Clone, PartialEq)]
struct Detection {
    incident_type: IncidentType,
    dedupe_key: String,
    title: String,
    source: String,
    details: Value,
    /// Suppressed by any earlier incident, not only active ones.
    once_only: bool,
}

#[derive(Clone)]
pub struct IncidentService {
    store: EntityStore,
    worker_error_threshold: u32,
}

impl IncidentService {
    pub fn new(store: EntityStore, worker_error_threshold: u32) -> Self {
        Self {
            store,
            worker_error_threshold: worker_error_threshold.max(1),
        }
    }

    /// Scan for anomalies and open one incident per new dedupe key.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> DomainResult<IncidentScanSummary> {
        let detections = self.detect().await?;
        let existing: Vec<ExecutionIncident> = self.store.list(None).await?;
        let mut by_key: HashMap<&str, Vec<&ExecutionIncident>> = HashMap::new();
        for incident in &existing {
            by_key.entry(incident.dedupe_key.as_str()).or_default().push(incident);
        }

        let mut summary = IncidentScanSummary {
            detected: detections.len(),
            ..IncidentScanSummary::default()
        };
        for detection in detections {
            let suppressed = by_key.get(detection.dedupe_key.as_str()).is_some_and(|prior| {
                prior
                    .iter()
                    .any(|incident| detection.once_only || incident.status.is_active())
            });
            if suppressed {
                summary.skipped += 1;
                continue;
            }

            let incident = ExecutionIncident {
                id: new_record_id("INC"),
                title: detection.title,
                status: IncidentStatus::Open,
                incident_type: detection.incident_type,
                source: detection.source,
                dedupe_key: detection.dedupe_key,
                details: detection.details,
                detected_at: Utc::now(),
                acknowledged_at: None,
                resolved_at: None,
                notes: Vec::new(),
            };
            self.store
                .create(&incident, &format!("Open incident {}", incident.dedupe_key))
                .await?;
            info!(
                incident_id = %incident.id,
                dedupe_key = %incident.dedupe_key,
                incident_type = incident.incident_type.as_str(),
                "incident opened"
            );
            summary.created += 1;
            summary.created_ids.push(incident.id);
        }
        Ok(summary)
    }

    async fn detect(&self) -> DomainResult<Vec<Detection>> {
        let mut detections = Vec::new();

        let runs: Vec<ExecutionRun> = self.store.list(None).await?;
        for run in &runs {
            if run.retry_exhausted {
                detections.push(Detection {
                    incident_type: IncidentType::RetryExhausted,
                    dedupe_key: format!("retry-exhausted:{}", run.id),
                    title: format!("Execution run {} exhausted its retries", run.id),
                    source: WorkerId::RetryWorker.as_str().to_string(),
                    details: run_details(run),
                    once_only: true,
                });
            }
            if run.status == RunStatus::Failed
                && run.failure_code.as_deref() == Some(codes::STALE_UNKNOWN_STATUS)
            {
                detections.push(Detection {
                    incident_type: IncidentType::UnknownStatus,
                    dedupe_key: format!("unknown-status:{}", run.id),
                    title: format!("Execution run {} stuck at an unknown status", run.id),
                    source: WorkerId::ExecutionPoller.as_str().to_string(),
                    details: run_details(run),
                    once_only: true,
                });
            }
        }

        let health: Vec<AdapterHealth> = self.store.list(None).await?;
        for probe in health.iter().filter(|h| h.status.is_unhealthy()) {
            detections.push(Detection {
                incident_type: IncidentType::AdapterDegraded,
                dedupe_key: format!("adapter-health:{}", probe.adapter_id),
                title: format!("Adapter {} is {}", probe.adapter_id, probe.status.as_str()),
                source: "adapter-health".to_string(),
                details: json!({
                    "adapterId": probe.adapter_id,
                    "status": probe.status,
                    "detail": probe.detail,
                    "checkedAt": probe.checked_at,
                }),
                once_only: false,
            });
        }

        let leases: Vec<WorkerLeaseState> = self.store.list(None).await?;
        for lease in leases
            .iter()
            .filter(|l| l.error_streak >= self.worker_error_threshold)
        {
            detections.push(Detection {
                incident_type: IncidentType::WorkerErrors,
                dedupe_key: format!("worker-errors:{}", lease.worker_id),
                title: format!(
                    "Worker {} failed {} consecutive ticks",
                    lease.worker_id, lease.error_streak
                ),
                source: lease.worker_id.as_str().to_string(),
                details: json!({
                    "workerId": lease.worker_id,
                    "errorStreak": lease.error_streak,
                    "lastError": lease.last_error,
                    "leaseOwner": lease.lease_owner,
                }),
                once_only: false,
            });
        }

        Ok(detections)
    }

    /// Incidents, newest first.
    pub async fn list(&self, status: Option<IncidentStatus>) -> DomainResult<Vec<ExecutionIncident>> {
        let mut incidents: Vec<ExecutionIncident> = self.store.list(None).await?;
        if let Some(status) = status {
            incidents.retain(|i| i.status == status);
        }
        incidents.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(a.id.cmp(&b.id)));
        Ok(incidents)
    }

    pub async fn get(&self, incident_id: &str) -> DomainResult<ExecutionIncident> {
        Ok(self.store.require::<ExecutionIncident>(ENTITY, incident_id).await?.entity)
    }

    pub async fn ack(
        &self,
        incident_id: &str,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> DomainResult<ExecutionIncident> {
        self.transition(incident_id, IncidentStatus::Acked, actor, note).await
    }

    pub async fn resolve(
        &self,
        incident_id: &str,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> DomainResult<ExecutionIncident> {
        self.transition(incident_id, IncidentStatus::Resolved, actor, note).await
    }

    async fn transition(
        &self,
        incident_id: &str,
        next: IncidentStatus,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> DomainResult<ExecutionIncident> {
        let mut stored = self.store.require::<ExecutionIncident>(ENTITY, incident_id).await?;
        let incident = &mut stored.entity;
        if !incident.status.can_transition_to(next) {
            return Err(DomainError::BadRequest(format!(
                "incident {incident_id} is {} and cannot become {}",
                incident.status.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now();
        incident.status = next;
        match next {
            IncidentStatus::Acked => incident.acknowledged_at = Some(now),
            IncidentStatus::Resolved => incident.resolved_at = Some(now),
            IncidentStatus::Open => {}
        }
        incident.notes.push(IncidentNote {
            at: now,
            status: next,
            actor: actor.map(str::to_string),
            note: note.unwrap_or(next.as_str()).to_string(),
        });

        self.store
            .save(
                &stored.entity,
                Some(stored.version),
                &format!("Incident {incident_id} {}", next.as_str()),
            )
            .await?;
        info!(incident_id, status = next.as_str(), actor = actor.unwrap_or(""), "incident updated");
        Ok(stored.entity)
    }

    /// Read-only counts by status and type.
    pub async fn summary(&self) -> DomainResult<IncidentSummary> {
        let incidents: Vec<ExecutionIncident> = self.store.list(None).await?;
        let mut summary = IncidentSummary {
            total: incidents.len(),
            ..IncidentSummary::default()
        };
        for incident in &incidents {
            match incident.status {
                IncidentStatus::Open => summary.open += 1,
                IncidentStatus::Acked => summary.acked += 1,
                IncidentStatus::Resolved => summary.resolved += 1,
            }
            *summary
                .by_type
                .entry(incident.incident_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(summary)
    }
}

fn run_details(run: &ExecutionRun) -> Value {
    json!({
        "executionRunId": run.id,
        "robotPlanId": run.robot_plan_id,
        "adapterId": run.adapter_id,
        "attempt": run.attempt,
        "failureClass": run.failure_class,
        "failureCode": run.failure_code,
        "lastStatusRaw": run.last_status_raw,
    })
}

/// Worker unit running the incident scan.
pub struct IncidentWorker {
    incidents: Arc<IncidentService>,
}

impl IncidentWorker {
    pub fn new(incidents: Arc<IncidentService>) -> Self {
        Self { incidents }
    }
}

#[async_trait]
impl WorkerUnit for IncidentWorker {
    fn worker_id(&self) -> WorkerId {
        WorkerId::IncidentScanner
    }

    async fn run_tick(&self) -> DomainResult<Value> {
        Ok(serde_json::to_value(self.incidents.scan().await?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::models::{ExecutionMode, HealthStatus};

    fn setup() -> (EntityStore, IncidentService) {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        (store.clone(), IncidentService::new(store, 3))
    }

    async fn exhausted_run(store: &EntityStore, id: &str) {
        let mut run = ExecutionRun::new(id.into(), "RP-1", "ot2", ExecutionMode::DirectHttp);
        run.status = RunStatus::Failed;
        run.retry_exhausted = true;
        store.create(&run, "seed").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_dedupes_by_key() {
        let (store, incidents) = setup();
        exhausted_run(&store, "EXR-1").await;

        let first = incidents.scan().await.unwrap();
        assert_eq!(first.created, 1);
        let second = incidents.scan().await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);

        let open = incidents.list(Some(IncidentStatus::Open)).await.unwrap();
        assert_eq!(open[0].dedupe_key, "retry-exhausted:EXR-1");
    }

    #[tokio::test]
    async fn test_resolved_condition_reopens() {
        let (store, incidents) = setup();
        store
            .create(
                &AdapterHealth {
                    id: AdapterHealth::id_for("ot2"),
                    adapter_id: "ot2".into(),
                    status: HealthStatus::Down,
                    detail: Some("connection refused".into()),
                    checked_at: Utc::now(),
                },
                "probe",
            )
            .await
            .unwrap();

        let first = incidents.scan().await.unwrap();
        let id = first.created_ids[0].clone();
        incidents.ack(&id, Some("ops"), Some("looking")).await.unwrap();
        assert_eq!(incidents.scan().await.unwrap().created, 0);

        let resolved = incidents.resolve(&id, Some("ops"), None).await.unwrap();
        assert_eq!(resolved.notes.len(), 2);
        assert!(resolved.acknowledged_at.is_some());
        assert_eq!(incidents.scan().await.unwrap().created, 1);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_bad_request() {
        let (store, incidents) = setup();
        exhausted_run(&store, "EXR-2").await;
        let id = incidents.scan().await.unwrap().created_ids[0].clone();
        incidents.resolve(&id, None, Some("fixed")).await.unwrap();

        let err = incidents.ack(&id, None, None).await.unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
        assert_eq!(incidents.scan().await.unwrap().created, 0);

        let summary = incidents.summary().await.unwrap();
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.by_type.get("retry_exhausted"), Some(&1));
    }

    #[tokio::test]
    async fn test_worker_error_streak_opens_incident() {
        let (store, incidents) = setup();
        let mut lease = WorkerLeaseState::new(WorkerId::ExecutionPoller, 5_000);
        lease.error_streak = 3;
        lease.last_error = Some("bridge unreachable".into());
        store.upsert(&lease, "seed").await.unwrap();

        let summary = incidents.scan().await.unwrap();
        assert_eq!(summary.created, 1);
        let incident = incidents.get(&summary.created_ids[0]).await.unwrap();
        assert_eq!(incident.dedupe_key, "worker-errors:execution-poller");
    }
}
