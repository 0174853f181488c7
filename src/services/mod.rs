//! Service layer: the execution engine's business logic.
//!
//! Services depend only on domain ports; adapters are injected at startup.

pub mod bridge_contract;
pub mod event_graph;
pub mod execution_poller;
pub mod execution_run_store;
pub mod failure_classifier;
pub mod incident_service;
pub mod operations;
pub mod orchestrator;
pub mod retry_worker;
pub mod run_completion;
pub mod task_service;
pub mod worker_lease;
pub mod worker_manager;

pub use bridge_contract::BridgeContractParser;
pub use event_graph::EventGraphMaterializer;
pub use execution_poller::{ExecutionPoller, ExecutionPollerWorker, PollSummary, PollerPolicy};
pub use execution_run_store::ExecutionRunStore;
pub use failure_classifier::classify;
pub use incident_service::{IncidentScanSummary, IncidentService, IncidentSummary, IncidentWorker};
pub use operations::{OperationsService, OperationsSnapshot};
pub use orchestrator::{ExecutionOrchestrator, PlanExecutionStatus};
pub use retry_worker::{ExecutionRetryWorker, RetryPolicy, RetrySummary};
pub use run_completion::{PlannedRunSync, RunCompletion};
pub use task_service::ExecutionTaskService;
pub use worker_lease::{TickReport, WorkerLeaseCoordinator, WorkerStatus};
pub use worker_manager::WorkerManager;
