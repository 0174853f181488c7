//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - RecordStore: the versioned record store the engine persists into
//! - HttpFetcher / ProcessRunner: the network and process boundary
//! - ExecutionBackend: one bridge handler per execution mode
//! - WorkerUnit / AttemptLauncher: seams used by the background workers

pub mod execution_backend;
pub mod http_fetcher;
pub mod process_runner;
pub mod record_store;
pub mod worker_unit;

pub use execution_backend::{
    CancelOutcome, ExecutionBackend, HealthProbe, RemoteStatus, SubmitOutcome, SubmitRequest,
};
pub use http_fetcher::{HttpFetcher, HttpMethod, HttpRequest, HttpResponse};
pub use process_runner::{ProcessOutput, ProcessRunner, ProcessSpec, TIMEOUT_EXIT_CODE};
pub use record_store::{EntityStore, RecordStore};
pub use worker_unit::{AttemptLauncher, WorkerUnit};
