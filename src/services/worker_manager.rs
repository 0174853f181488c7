//! Named leased workers behind one handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorkerId, WorkerLeaseState, WorkersConfig};
use crate::domain::ports::{EntityStore, WorkerUnit};
use crate::services::worker_lease::{new_lease_owner, TickReport, WorkerLeaseCoordinator, WorkerStatus};

/// Owns one [`WorkerLeaseCoordinator`] per registered worker. All
/// coordinators of a manager share one lease owner identity.
#[derive(Clone)]
pub struct WorkerManager {
    store: EntityStore,
    config: WorkersConfig,
    owner: String,
    workers: BTreeMap<WorkerId, WorkerLeaseCoordinator>,
}

impl WorkerManager {
    pub fn new(store: EntityStore, config: WorkersConfig) -> Self {
        Self::with_owner(store, config, new_lease_owner())
    }

    pub fn with_owner(store: EntityStore, config: WorkersConfig, owner: impl Into<String>) -> Self {
        Self {
            store,
            config,
            owner: owner.into(),
            workers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, unit: Arc<dyn WorkerUnit>) {
        let worker_id = unit.worker_id();
        let lease_ttl_ms = self.config.for_worker(worker_id).lease_ttl_ms;
        let coordinator = WorkerLeaseCoordinator::with_owner(unit, self.store.clone(), self.owner.clone())
            .with_lease_ttl_ms(lease_ttl_ms);
        self.workers.insert(worker_id, coordinator);
    }

    pub fn with(mut self, unit: Arc<dyn WorkerUnit>) -> Self {
        self.register(unit);
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn coordinator(&self, worker_id: WorkerId) -> DomainResult<&WorkerLeaseCoordinator> {
        self.workers
            .get(&worker_id)
            .ok_or_else(|| DomainError::not_found("worker", worker_id.as_str()))
    }

    /// Start a worker. Without an explicit interval the configured one is used.
    pub async fn start(
        &self,
        worker_id: WorkerId,
        interval_ms: Option<u64>,
        force_takeover: bool,
    ) -> DomainResult<WorkerStatus> {
        let interval_ms = interval_ms.unwrap_or(self.config.for_worker(worker_id).interval_ms);
        self.coordinator(worker_id)?
            .start(interval_ms, force_takeover)
            .await
    }

    /// Start a worker even if another owner holds its lease.
    pub async fn takeover(&self, worker_id: WorkerId, interval_ms: Option<u64>) -> DomainResult<WorkerStatus> {
        self.start(worker_id, interval_ms, true).await
    }

    pub async fn stop(&self, worker_id: WorkerId, persist: bool) -> DomainResult<WorkerStatus> {
        self.coordinator(worker_id)?.stop(persist).await
    }

    pub async fn run_once(&self, worker_id: WorkerId) -> DomainResult<TickReport> {
        Ok(self.coordinator(worker_id)?.run_once().await)
    }

    pub async fn status(&self, worker_id: WorkerId) -> DomainResult<WorkerStatus> {
        self.coordinator(worker_id)?.status().await
    }

    pub async fn statuses(&self) -> DomainResult<Vec<WorkerStatus>> {
        let mut statuses = Vec::with_capacity(self.workers.len());
        for coordinator in self.workers.values() {
            statuses.push(coordinator.status().await?);
        }
        Ok(statuses)
    }

    /// Resume every worker whose persisted lease says it was running.
    /// A failing worker does not keep the others from restoring.
    pub async fn restore_all(&self) -> Vec<WorkerStatus> {
        let mut restored = Vec::new();
        for (worker_id, coordinator) in &self.workers {
            match coordinator.restore().await {
                Ok(status) => restored.push(status),
                Err(e) => warn!(worker_id = %worker_id, error = %e, "failed to restore worker"),
            }
        }
        restored
    }

    /// Start every worker configured with `autostart`.
    pub async fn autostart(&self) -> Vec<WorkerStatus> {
        let mut started = Vec::new();
        for worker_id in self.worker_ids() {
            if !self.config.for_worker(worker_id).autostart {
                continue;
            }
            match self.start(worker_id, None, false).await {
                Ok(status) => started.push(status),
                Err(e) => warn!(worker_id = %worker_id, error = %e, "failed to autostart worker"),
            }
        }
        started
    }

    /// Stop every worker concurrently, waiting for in-flight ticks.
    pub async fn stop_all(&self, persist: bool) {
        let stops = self.workers.values().map(|coordinator| coordinator.stop(persist));
        for (worker_id, result) in self.workers.keys().zip(join_all(stops).await) {
            if let Err(e) = result {
                warn!(worker_id = %worker_id, error = %e, "failed to stop worker");
            }
        }
        info!(owner = %self.owner, persist, "all workers stopped");
    }

    /// Persisted lease records of all workers, including unregistered ones.
    pub async fn list_leases(&self) -> DomainResult<Vec<WorkerLeaseState>> {
        let mut leases: Vec<WorkerLeaseState> = self.store.list(None).await?;
        leases.sort_by_key(|lease| lease.worker_id);
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::models::WorkerConfig;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Noop(WorkerId);

    #[async_trait]
    impl WorkerUnit for Noop {
        fn worker_id(&self) -> WorkerId {
            self.0
        }

        async fn run_tick(&self) -> DomainResult<Value> {
            Ok(json!({"ok": true}))
        }
    }

    fn manager(store: &EntityStore, owner: &str) -> WorkerManager {
        let mut config = WorkersConfig::default();
        config.retry_worker = WorkerConfig {
            interval_ms: 60_000,
            lease_ttl_ms: None,
            autostart: true,
        };
        config.execution_poller.autostart = false;
        WorkerManager::with_owner(store.clone(), config, owner)
            .with(Arc::new(Noop(WorkerId::ExecutionPoller)))
            .with(Arc::new(Noop(WorkerId::RetryWorker)))
    }

    #[tokio::test]
    async fn test_unregistered_worker_is_not_found() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let manager = manager(&store, "a");
        let err = manager.status(WorkerId::IncidentScanner).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_autostart_and_restore_across_managers() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let first = manager(&store, "a");
        let started = first.autostart().await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].worker_id, WorkerId::RetryWorker);

        let leases = first.list_leases().await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].lease_owner.as_deref(), Some("a"));

        let second = manager(&store, "b");
        let restored = second.restore_all().await;
        let retry = restored
            .iter()
            .find(|s| s.worker_id == WorkerId::RetryWorker)
            .unwrap();
        assert!(!retry.running);
        assert_eq!(retry.lease_blocked_by.as_deref(), Some("a"));

        let taken = second.takeover(WorkerId::RetryWorker, None).await.unwrap();
        assert!(taken.running);
        assert_eq!(taken.lease_owner.as_deref(), Some("b"));

        first.stop_all(true).await;
        second.stop_all(true).await;
        let leases = second.list_leases().await.unwrap();
        assert!(leases.iter().all(|lease| !lease.running));
    }

    #[tokio::test]
    async fn test_run_once_reports_summary() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let manager = manager(&store, "a");
        let report = manager.run_once(WorkerId::ExecutionPoller).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.summary, Some(json!({"ok": true})));
    }
}
