pub mod bridge;
pub mod config;
pub mod execution_run;
pub mod execution_task;
pub mod failure;
pub mod incident;
pub mod lab;
pub mod record;
pub mod worker_lease;

pub use bridge::{
    BridgeContractEnvelope, BridgeOperation, ParsedBridgeResponse, RemoteRunState,
    BRIDGE_CONTRACT_VERSION,
};
pub use config::{
    AdapterConfig, Config, DatabaseConfig, ExecutionConfig, ExecutorConfig, LoggingConfig,
    WorkerConfig, WorkersConfig,
};
pub use execution_run::{ExecutionMode, ExecutionRun, RunStatus};
pub use execution_task::{
    ExecutionTask, FinalStatus, InstrumentLog, LogEntry, ProgressAck, TaskStatus,
    TASK_CONTRACT_VERSION,
};
pub use failure::{FailureClass, FailureClassification, FailureSignals};
pub use incident::{ExecutionIncident, IncidentNote, IncidentStatus, IncidentType};
pub use lab::{AdapterHealth, EventGraph, HealthStatus, PlannedRunState, RobotPlan};
pub use record::{
    new_record_id, NewRecord, Record, RecordEntity, RecordKind, RecordQuery, RecordUpdate, Stored,
};
pub use worker_lease::{WorkerId, WorkerLeaseState};
