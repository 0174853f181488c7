//! Leased, interval-driven background workers.
//!
//! A [`WorkerLeaseCoordinator`] owns one [`WorkerUnit`] and runs it on an
//! interval while it holds the persisted lease for the unit's worker id.
//! Lease writes are versioned: a write that races another process is
//! re-read and re-decided against the fresh lease, so a takeover is never
//! undone by a stale copy. Worker units are still written so that running
//! a tick twice is harmless.
//!
//! Lease bookkeeping writes never fail a tick or a start. A failed write is
//! logged and reported as `degraded` on the worker status until the next
//! successful write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorkerId, WorkerLeaseState};
use crate::domain::ports::{EntityStore, WorkerUnit};

/// Lower bound of the lease TTL.
pub const MIN_LEASE_TTL_MS: u64 = 30_000;

/// Lease writes that lose to a concurrent writer are retried this often.
const MAX_LEASE_WRITE_ATTEMPTS: u32 = 3;

/// Lease TTL for a worker ticking every `interval_ms`.
pub fn default_lease_ttl_ms(interval_ms: u64) -> u64 {
    MIN_LEASE_TTL_MS.max(interval_ms.saturating_mul(3))
}

/// Opaque owner id for this process instance.
pub fn new_lease_owner() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("pid{}-{}", std::process::id(), &suffix[..12])
}

/// Worker status as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    /// Whether this instance is running the loop.
    pub running: bool,
    pub interval_ms: u64,
    /// Owner id of this instance.
    pub owner: String,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Holder that refused the last start attempt.
    pub lease_blocked_by: Option<String>,
    pub lease_blocked_until: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_summary: Option<Value>,
    pub error_streak: u32,
    pub last_error: Option<String>,
    pub tick_in_flight: bool,
    /// Set while lease bookkeeping writes are failing.
    pub degraded: bool,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub worker_id: WorkerId,
    /// The tick was skipped because another tick was in flight.
    pub skipped: bool,
    pub summary: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct LocalState {
    running: bool,
    interval_ms: u64,
    lease_expires_at: Option<DateTime<Utc>>,
    lease_blocked_by: Option<String>,
    lease_blocked_until: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_run_summary: Option<Value>,
    error_streak: u32,
    last_error: Option<String>,
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct Shared {
    unit: Arc<dyn WorkerUnit>,
    store: EntityStore,
    owner: String,
    lease_ttl_override_ms: Option<u64>,
    state: RwLock<LocalState>,
    loop_handle: Mutex<Option<LoopHandle>>,
    in_flight: AtomicBool,
    degraded: AtomicBool,
}

/// Runs one worker unit under a persisted lease.
#[derive(Clone)]
pub struct WorkerLeaseCoordinator {
    shared: Arc<Shared>,
}

impl WorkerLeaseCoordinator {
    pub fn new(unit: Arc<dyn WorkerUnit>, store: EntityStore) -> Self {
        Self::with_owner(unit, store, new_lease_owner())
    }

    pub fn with_owner(unit: Arc<dyn WorkerUnit>, store: EntityStore, owner: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                unit,
                store,
                owner: owner.into(),
                lease_ttl_override_ms: None,
                state: RwLock::new(LocalState::default()),
                loop_handle: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                degraded: AtomicBool::new(false),
            }),
        }
    }

    /// Override the default lease TTL. Only effective before the
    /// coordinator is cloned or started.
    pub fn with_lease_ttl_ms(mut self, ttl_ms: Option<u64>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.lease_ttl_override_ms = ttl_ms;
        }
        self
    }

    pub fn worker_id(&self) -> WorkerId {
        self.shared.unit.worker_id()
    }

    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    pub fn lease_ttl_ms(&self, interval_ms: u64) -> u64 {
        self.shared
            .lease_ttl_override_ms
            .unwrap_or_else(|| default_lease_ttl_ms(interval_ms))
    }

    /// Acquire the lease and start the interval loop.
    ///
    /// Returns `running: false` with `lease_blocked_by` set when another
    /// owner holds an unexpired lease and `force_takeover` is false.
    pub async fn start(&self, interval_ms: u64, force_takeover: bool) -> DomainResult<WorkerStatus> {
        let worker_id = self.worker_id();
        let mut handle_slot = self.shared.loop_handle.lock().await;
        // A loop that gave up its lease has exited but left its handle behind.
        if handle_slot.as_ref().is_some_and(|handle| handle.join.is_finished()) {
            debug!(worker_id = %worker_id, "reaping exited worker loop");
            *handle_slot = None;
        }
        if handle_slot.is_some() {
            debug!(worker_id = %worker_id, "worker already running");
            drop(handle_slot);
            return self.status().await;
        }

        let interval_ms = interval_ms.max(1);
        let owner = self.shared.owner.clone();
        let ttl = chrono::Duration::milliseconds(ms_i64(self.lease_ttl_ms(interval_ms)));
        let lease = self
            .modify_lease("Start worker", interval_ms, |lease| {
                let now = Utc::now();
                if lease.is_held_by_other(&owner, now) {
                    if !force_takeover {
                        return false;
                    }
                    warn!(
                        worker_id = %worker_id,
                        previous_owner = lease.lease_owner.as_deref().unwrap_or(""),
                        lease_owner = %owner,
                        "forcing worker lease takeover"
                    );
                }
                lease.running = true;
                lease.interval_ms = interval_ms;
                lease.lease_owner = Some(owner.clone());
                lease.lease_expires_at = Some(now + ttl);
                lease.started_at = Some(now);
                lease.stopped_at = None;
                lease.updated_at = now;
                true
            })
            .await?;

        if !lease.is_owned_by(&owner) {
            info!(
                worker_id = %worker_id,
                lease_owner = lease.lease_owner.as_deref().unwrap_or(""),
                "worker lease held by another owner, not starting"
            );
            {
                let mut state = self.shared.state.write().await;
                state.running = false;
                state.lease_blocked_by.clone_from(&lease.lease_owner);
                state.lease_blocked_until = lease.lease_expires_at;
            }
            drop(handle_slot);
            return self.status().await;
        }
        let expires_at = lease.lease_expires_at;

        {
            let mut state = self.shared.state.write().await;
            state.running = true;
            state.interval_ms = interval_ms;
            state.lease_expires_at = expires_at;
            state.lease_blocked_by = None;
            state.lease_blocked_until = None;
            state.error_streak = lease.error_streak;
            state.last_error.clone_from(&lease.last_error);
            state.last_run_at = lease.last_run_at;
            state.last_run_summary.clone_from(&lease.last_run_summary);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = self.clone();
        let join = tokio::spawn(async move { worker.run_loop(interval_ms, stop_rx).await });
        *handle_slot = Some(LoopHandle { stop_tx, join });

        info!(worker_id = %worker_id, lease_owner = %self.shared.owner, interval_ms, "worker started");
        drop(handle_slot);
        self.status().await
    }

    /// Halt the loop. With `persist`, the lease is released if this
    /// instance still owns it.
    pub async fn stop(&self, persist: bool) -> DomainResult<WorkerStatus> {
        let worker_id = self.worker_id();
        let handle = self.shared.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(true);
            if let Err(e) = handle.join.await {
                warn!(worker_id = %worker_id, error = %e, "worker loop ended abnormally");
            }
        }
        self.shared.state.write().await.running = false;

        if persist {
            let owner = self.shared.owner.clone();
            let interval_ms = self.shared.state.read().await.interval_ms;
            let released = self
                .modify_lease_existing("Stop worker", interval_ms, |lease| {
                    if !lease.is_owned_by(&owner) {
                        return false;
                    }
                    let now = Utc::now();
                    lease.running = false;
                    lease.lease_owner = None;
                    lease.lease_expires_at = None;
                    lease.stopped_at = Some(now);
                    lease.updated_at = now;
                    true
                })
                .await;
            match released {
                Ok(Some(lease)) if lease.lease_owner.is_some() => {
                    info!(
                        worker_id = %worker_id,
                        lease_owner = lease.lease_owner.as_deref().unwrap_or(""),
                        "lease owned elsewhere, leaving it untouched"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "failed to load lease on stop");
                    self.shared.degraded.store(true, Ordering::Release);
                }
            }
        }

        info!(worker_id = %worker_id, persist, "worker stopped");
        self.status().await
    }

    /// In-memory state merged with the persisted lease metadata.
    pub async fn status(&self) -> DomainResult<WorkerStatus> {
        let lease = match self.load_lease().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(worker_id = %self.worker_id(), error = %e, "failed to load lease for status");
                None
            }
        };
        let state = self.shared.state.read().await;
        Ok(WorkerStatus {
            worker_id: self.worker_id(),
            running: state.running,
            interval_ms: if state.interval_ms > 0 {
                state.interval_ms
            } else {
                lease.as_ref().map_or(0, |l| l.interval_ms)
            },
            owner: self.shared.owner.clone(),
            lease_owner: lease.as_ref().and_then(|l| l.lease_owner.clone()),
            lease_expires_at: lease
                .as_ref()
                .and_then(|l| l.lease_expires_at)
                .or(state.lease_expires_at),
            lease_blocked_by: state.lease_blocked_by.clone(),
            lease_blocked_until: state.lease_blocked_until,
            last_run_at: state
                .last_run_at
                .or_else(|| lease.as_ref().and_then(|l| l.last_run_at)),
            last_run_summary: state
                .last_run_summary
                .clone()
                .or_else(|| lease.as_ref().and_then(|l| l.last_run_summary.clone())),
            error_streak: state.error_streak,
            last_error: state.last_error.clone(),
            tick_in_flight: self.shared.in_flight.load(Ordering::Acquire),
            degraded: self.shared.degraded.load(Ordering::Acquire),
        })
    }

    /// Resume a worker whose persisted lease says it was running.
    pub async fn restore(&self) -> DomainResult<WorkerStatus> {
        match self.load_lease().await? {
            Some(lease) if lease.running => {
                info!(
                    worker_id = %self.worker_id(),
                    previous_owner = lease.lease_owner.as_deref().unwrap_or(""),
                    "restoring worker"
                );
                self.start(lease.interval_ms, false).await
            }
            _ => self.status().await,
        }
    }

    /// Run a single tick now, outside the interval.
    pub async fn run_once(&self) -> TickReport {
        self.tick(false).await
    }

    async fn run_loop(&self, interval_ms: u64, mut stop_rx: watch::Receiver<bool>) {
        let worker_id = self.worker_id();
        let mut timer = interval(Duration::from_millis(interval_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    if self.lease_lost().await {
                        warn!(worker_id = %worker_id, lease_owner = %self.shared.owner, "worker lease taken over, stopping loop");
                        self.shared.state.write().await.running = false;
                        break;
                    }
                    self.tick(true).await;
                }
            }
        }
        debug!(worker_id = %worker_id, "worker loop exited");
    }

    /// Whether another owner has taken the lease since we acquired it.
    async fn lease_lost(&self) -> bool {
        match self.load_lease().await {
            Ok(Some(lease)) => {
                lease.running
                    && lease
                        .lease_owner
                        .as_deref()
                        .is_some_and(|holder| holder != self.shared.owner)
            }
            Ok(None) => false,
            Err(e) => {
                warn!(worker_id = %self.worker_id(), error = %e, "failed to check lease ownership");
                self.shared.degraded.store(true, Ordering::Release);
                false
            }
        }
    }

    async fn tick(&self, renew: bool) -> TickReport {
        let worker_id = self.worker_id();
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            debug!(worker_id = %worker_id, "tick already in flight, skipping");
            return TickReport {
                worker_id,
                skipped: true,
                summary: None,
                error: None,
            };
        }

        let span = info_span!("worker_tick", worker_id = %worker_id);
        let report = async {
            let result = self.shared.unit.run_tick().await;
            let report = match result {
                Ok(summary) => {
                    debug!(summary = %summary, "tick completed");
                    TickReport {
                        worker_id,
                        skipped: false,
                        summary: Some(summary),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "tick failed");
                    TickReport {
                        worker_id,
                        skipped: false,
                        summary: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.record_tick(&report, renew).await;
            report
        }
        .instrument(span)
        .await;

        self.shared.in_flight.store(false, Ordering::Release);
        report
    }

    async fn record_tick(&self, report: &TickReport, renew: bool) {
        let now = Utc::now();
        let (error_streak, interval_ms) = {
            let mut state = self.shared.state.write().await;
            state.last_run_at = Some(now);
            if let Some(error) = &report.error {
                state.error_streak += 1;
                state.last_error = Some(error.clone());
            } else {
                state.error_streak = 0;
                state.last_error = None;
                state.last_run_summary.clone_from(&report.summary);
            }
            (state.error_streak, state.interval_ms)
        };

        let owner = self.shared.owner.clone();
        let expires_at = now + chrono::Duration::milliseconds(ms_i64(self.lease_ttl_ms(interval_ms)));
        let recorded = self
            .modify_lease("Record worker tick", interval_ms, |lease| {
                lease.last_run_at = Some(now);
                lease.error_streak = error_streak;
                if let Some(error) = &report.error {
                    lease.last_error = Some(error.clone());
                } else {
                    lease.last_error = None;
                    lease.last_run_summary.clone_from(&report.summary);
                }
                if renew && (lease.lease_owner.is_none() || lease.is_owned_by(&owner)) {
                    lease.running = true;
                    lease.lease_owner = Some(owner.clone());
                    lease.lease_expires_at = Some(expires_at);
                }
                lease.updated_at = now;
                true
            })
            .await;

        match recorded {
            Ok(lease) if renew && lease.is_owned_by(&owner) => {
                self.shared.state.write().await.lease_expires_at = lease.lease_expires_at;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failed to load lease, tick not recorded");
                self.shared.degraded.store(true, Ordering::Release);
            }
        }
    }

    async fn load_lease(&self) -> DomainResult<Option<WorkerLeaseState>> {
        let record_id = self.worker_id().lease_record_id();
        Ok(self
            .shared
            .store
            .get::<WorkerLeaseState>(&record_id)
            .await?
            .map(|stored| stored.entity))
    }

    /// Versioned read-modify-write of the lease record.
    ///
    /// `apply` sees the latest stored lease (or a fresh one) and returns
    /// whether to write it. A write that loses to a concurrent writer is
    /// re-read and re-applied, so another owner's lease is never
    /// overwritten with a stale copy. Load failures are returned; write
    /// failures only mark the coordinator degraded.
    async fn modify_lease<F>(&self, message: &str, interval_ms: u64, mut apply: F) -> DomainResult<WorkerLeaseState>
    where
        F: FnMut(&mut WorkerLeaseState) -> bool + Send,
    {
        let record_id = self.worker_id().lease_record_id();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let stored = self.shared.store.get::<WorkerLeaseState>(&record_id).await?;
            let (mut lease, version) = match stored {
                Some(stored) => (stored.entity, Some(stored.version)),
                None => (WorkerLeaseState::new(self.worker_id(), interval_ms), None),
            };
            if !apply(&mut lease) {
                return Ok(lease);
            }

            let written = match version {
                Some(version) => self.shared.store.save(&lease, Some(version), message).await,
                None => self.shared.store.create(&lease, message).await,
            };
            match written {
                Ok(_) => {
                    self.shared.degraded.store(false, Ordering::Release);
                    return Ok(lease);
                }
                Err(DomainError::Conflict { .. } | DomainError::CreateFailed { .. })
                    if attempt < MAX_LEASE_WRITE_ATTEMPTS =>
                {
                    debug!(worker_id = %lease.worker_id, attempt, "lease changed underneath, re-reading");
                }
                Err(e) => {
                    warn!(
                        worker_id = %lease.worker_id,
                        lease_owner = %self.shared.owner,
                        error = %e,
                        "failed to persist worker lease"
                    );
                    self.shared.degraded.store(true, Ordering::Release);
                    return Ok(lease);
                }
            }
        }
    }

    /// Like [`modify_lease`](Self::modify_lease), but a missing lease is
    /// left missing.
    async fn modify_lease_existing<F>(
        &self,
        message: &str,
        interval_ms: u64,
        apply: F,
    ) -> DomainResult<Option<WorkerLeaseState>>
    where
        F: FnMut(&mut WorkerLeaseState) -> bool + Send,
    {
        if self.load_lease().await?.is_none() {
            return Ok(None);
        }
        self.modify_lease(message, interval_ms, apply).await.map(Some)
    }
}

fn ms_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryRecordStore;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{NewRecord, Record, RecordQuery, RecordUpdate};
    use crate::domain::ports::RecordStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct CountingUnit {
        ticks: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl WorkerUnit for CountingUnit {
        fn worker_id(&self) -> WorkerId {
            WorkerId::ExecutionPoller
        }

        async fn run_tick(&self) -> DomainResult<Value> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(DomainError::ExecutionFailed("bridge unreachable".into()));
            }
            Ok(json!({"tick": n}))
        }
    }

    fn unit(fail: bool) -> Arc<CountingUnit> {
        Arc::new(CountingUnit {
            ticks: AtomicU32::new(0),
            fail,
        })
    }

    #[test]
    fn test_default_ttl() {
        assert_eq!(default_lease_ttl_ms(1_000), 30_000);
        assert_eq!(default_lease_ttl_ms(20_000), 60_000);
    }

    #[tokio::test]
    async fn test_lease_exclusivity_and_takeover() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let a = WorkerLeaseCoordinator::with_owner(unit(false), store.clone(), "process-a");
        let b = WorkerLeaseCoordinator::with_owner(unit(false), store.clone(), "process-b");

        assert!(a.start(60_000, false).await.unwrap().running);

        let blocked = b.start(60_000, false).await.unwrap();
        assert!(!blocked.running);
        assert_eq!(blocked.lease_blocked_by.as_deref(), Some("process-a"));
        assert!(blocked.lease_blocked_until.is_some());

        let taken = b.start(60_000, true).await.unwrap();
        assert!(taken.running);
        assert_eq!(taken.lease_owner.as_deref(), Some("process-b"));

        a.stop(true).await.unwrap();
        let lease = store
            .get::<WorkerLeaseState>(&WorkerId::ExecutionPoller.lease_record_id())
            .await
            .unwrap()
            .unwrap()
            .entity;
        assert!(lease.running);
        assert_eq!(lease.lease_owner.as_deref(), Some("process-b"));

        b.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_acquired() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let mut stale = WorkerLeaseState::new(WorkerId::ExecutionPoller, 1_000);
        stale.running = true;
        stale.lease_owner = Some("crashed".into());
        stale.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        store.upsert(&stale, "seed").await.unwrap();

        let worker = WorkerLeaseCoordinator::with_owner(unit(false), store, "fresh");
        let status = worker.restore().await.unwrap();
        assert!(status.running);
        assert_eq!(status.lease_owner.as_deref(), Some("fresh"));
        worker.stop(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_errors_build_streak() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let worker = WorkerLeaseCoordinator::with_owner(unit(true), store.clone(), "solo");

        worker.run_once().await;
        let report = worker.run_once().await;
        assert_eq!(report.error.as_deref(), Some("Execution failed: bridge unreachable"));

        let status = worker.status().await.unwrap();
        assert_eq!(status.error_streak, 2);
        assert!(!status.running);

        let lease = store
            .get::<WorkerLeaseState>(&WorkerId::ExecutionPoller.lease_record_id())
            .await
            .unwrap()
            .unwrap()
            .entity;
        assert_eq!(lease.error_streak, 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_marks_degraded() {
        let raw = Arc::new(InMemoryRecordStore::new());
        raw.set_fail_writes(true);
        let worker = WorkerLeaseCoordinator::with_owner(unit(false), EntityStore::new(raw.clone()), "solo");

        let report = worker.run_once().await;
        assert!(report.error.is_none());
        assert!(worker.status().await.unwrap().degraded);

        raw.set_fail_writes(false);
        worker.run_once().await;
        assert!(!worker.status().await.unwrap().degraded);
    }

    #[tokio::test]
    async fn test_loop_ticks_and_stops() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let counting = unit(false);
        let worker = WorkerLeaseCoordinator::with_owner(counting.clone(), store, "solo");

        worker.start(10, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let stopped = worker.stop(true).await.unwrap();

        assert!(!stopped.running);
        assert!(counting.ticks.load(Ordering::SeqCst) >= 2);
        assert!(stopped.lease_owner.is_none());
    }

    async fn wait_until_stopped(worker: &WorkerLeaseCoordinator) {
        for _ in 0..100 {
            if !worker.status().await.unwrap().running {
                // let the loop task finish after flipping the flag
                tokio::time::sleep(Duration::from_millis(20)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker loop never stopped");
    }

    #[tokio::test]
    async fn test_force_start_after_loop_lost_lease() {
        let store = EntityStore::new(Arc::new(InMemoryRecordStore::new()));
        let a = WorkerLeaseCoordinator::with_owner(unit(false), store.clone(), "process-a");
        let b = WorkerLeaseCoordinator::with_owner(unit(false), store.clone(), "process-b");

        assert!(a.start(10, false).await.unwrap().running);
        assert!(b.start(10, true).await.unwrap().running);
        wait_until_stopped(&a).await;
        b.stop(false).await.unwrap();

        let restarted = a.start(10, true).await.unwrap();
        assert!(restarted.running);
        assert_eq!(restarted.lease_owner.as_deref(), Some("process-a"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(a.status().await.unwrap().running);
        a.stop(true).await.unwrap();
    }

    /// Lets another owner take the lease right before the first tick
    /// bookkeeping write lands.
    struct TakeoverBeforeTickWrite {
        inner: Arc<InMemoryRecordStore>,
        taken: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for TakeoverBeforeTickWrite {
        async fn get(&self, record_id: &str) -> DomainResult<Option<Record>> {
            self.inner.get(record_id).await
        }

        async fn create(&self, record: NewRecord) -> DomainResult<Record> {
            self.inner.create(record).await
        }

        async fn update(&self, update: RecordUpdate) -> DomainResult<Record> {
            if update.message == "Record worker tick" && !self.taken.swap(true, Ordering::SeqCst) {
                let mut lease = WorkerLeaseState::new(WorkerId::ExecutionPoller, 10);
                lease.running = true;
                lease.lease_owner = Some("process-b".into());
                lease.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(60));
                self.inner
                    .update(RecordUpdate {
                        payload: serde_json::to_value(&lease)?,
                        message: "Start worker".into(),
                        expected_version: None,
                        ..update.clone()
                    })
                    .await?;
            }
            self.inner.update(update).await
        }

        async fn list(&self, query: RecordQuery) -> DomainResult<Vec<Record>> {
            self.inner.list(query).await
        }
    }

    #[tokio::test]
    async fn test_tick_write_does_not_undo_concurrent_takeover() {
        let raw = Arc::new(TakeoverBeforeTickWrite {
            inner: Arc::new(InMemoryRecordStore::new()),
            taken: AtomicBool::new(false),
        });
        let store = EntityStore::new(raw.clone());
        let a = WorkerLeaseCoordinator::with_owner(unit(false), store.clone(), "process-a");

        assert!(a.start(10, false).await.unwrap().running);
        wait_until_stopped(&a).await;
        assert!(raw.taken.load(Ordering::SeqCst));

        let lease = store
            .get::<WorkerLeaseState>(&WorkerId::ExecutionPoller.lease_record_id())
            .await
            .unwrap()
            .unwrap()
            .entity;
        assert!(lease.running);
        assert_eq!(lease.lease_owner.as_deref(), Some("process-b"));

        a.stop(true).await.unwrap();
        let lease = store
            .get::<WorkerLeaseState>(&WorkerId::ExecutionPoller.lease_record_id())
            .await
            .unwrap()
            .unwrap()
            .entity;
        assert_eq!(lease.lease_owner.as_deref(), Some("process-b"));
    }
}
