//! Builds every service of the engine from one [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::adapters::backends::{AdapterDirectory, BackendRegistry};
use crate::adapters::sqlite::{database_url, initialize_database, PoolConfig};
use crate::adapters::{InMemoryRecordStore, ReqwestHttpFetcher, SqliteRecordStore, TokioProcessRunner};
use crate::domain::models::Config;
use crate::domain::ports::{EntityStore, HttpFetcher, ProcessRunner, RecordStore};
use crate::executor::{ClaimLoop, InProcessTaskApi, RunnerRegistry};
use crate::services::{
    ExecutionOrchestrator, ExecutionPoller, ExecutionPollerWorker, ExecutionRetryWorker,
    ExecutionRunStore, ExecutionTaskService, IncidentService, IncidentWorker, OperationsService,
    PollerPolicy, RetryPolicy, RunCompletion, WorkerManager,
};

/// The wired engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub config: Config,
    pub store: EntityStore,
    pub runs: ExecutionRunStore,
    pub tasks: ExecutionTaskService,
    pub orchestrator: Arc<ExecutionOrchestrator>,
    pub poller: Arc<ExecutionPoller>,
    pub incidents: Arc<IncidentService>,
    pub workers: WorkerManager,
    pub operations: OperationsService,
}

impl Engine {
    pub fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        fetcher: Arc<dyn HttpFetcher>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let store = EntityStore::new(records);
        let completion = RunCompletion::new(store.clone());
        let tasks = ExecutionTaskService::new(store.clone())
            .with_default_lease_ms(config.executor.lease_duration_ms);
        let backends = BackendRegistry::from_config(&config, fetcher, runner, tasks.clone());

        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            store.clone(),
            completion.clone(),
            backends.clone(),
            AdapterDirectory::new(config.adapters.clone()),
        ));
        let poller = Arc::new(ExecutionPoller::new(
            completion.clone(),
            backends,
            PollerPolicy::from(&config.execution),
        ));
        let retry_worker = ExecutionRetryWorker::new(
            completion.runs().clone(),
            orchestrator.clone(),
            RetryPolicy {
                max_attempts: config.execution.max_retry_attempts,
                batch_limit: config.execution.retry_batch_limit,
            },
        );
        let incidents = Arc::new(IncidentService::new(
            store.clone(),
            config.execution.worker_error_threshold,
        ));

        let workers = WorkerManager::new(store.clone(), config.workers.clone())
            .with(Arc::new(ExecutionPollerWorker::new(poller.clone())))
            .with(Arc::new(retry_worker))
            .with(Arc::new(IncidentWorker::new(incidents.clone())));

        Self {
            runs: completion.runs().clone(),
            operations: OperationsService::new(store.clone()),
            config,
            store,
            tasks,
            orchestrator,
            poller,
            incidents,
            workers,
        }
    }

    /// Open the configured SQLite store, or an in-memory one when `ephemeral`.
    pub async fn open(config: Config, ephemeral: bool) -> Result<Self> {
        let records: Arc<dyn RecordStore> = if ephemeral {
            info!("using ephemeral in-memory record store");
            Arc::new(InMemoryRecordStore::new())
        } else {
            let url = database_url(&config.database.path);
            let pool = initialize_database(
                &url,
                Some(PoolConfig {
                    max_connections: config.database.max_connections,
                    ..PoolConfig::default()
                }),
            )
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
            info!(path = %config.database.path, "record store ready");
            Arc::new(SqliteRecordStore::new(pool))
        };

        let fetcher = Arc::new(ReqwestHttpFetcher::from_adapters(&config.adapters));
        Ok(Self::new(config, records, fetcher, Arc::new(TokioProcessRunner::new())))
    }

    /// An executor claim loop talking to this engine's task service.
    pub fn claim_loop(&self, runners: RunnerRegistry) -> ClaimLoop {
        ClaimLoop::new(
            Arc::new(InProcessTaskApi::new(self.tasks.clone())),
            runners,
            self.config.executor.clone(),
        )
    }
}
