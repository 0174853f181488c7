//! labexec - execution orchestration for laboratory robot plans
//!
//! labexec submits compiled robot plans to instrument bridges, tracks every
//! execution attempt as a versioned record, and keeps runs moving with a
//! small set of leased background workers (status poller, retry worker,
//! incident scanner). Out-of-process executors claim queued work through a
//! sequence-gated task protocol.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Adapter Layer** (`adapters`): record stores, HTTP and process bridges
//! - **Service Layer** (`services`): classification, polling, retries, leases
//! - **Executor** (`executor`): the claim loop run by remote executors
//! - **Application Layer** (`application`): wires services into an [`Engine`]
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use labexec::{ConfigLoader, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::open(ConfigLoader::load()?, false).await?;
//!     let run = engine.orchestrator.execute_robot_plan("RP-1", None, None).await?;
//!     println!("{} is {}", run.id, run.status.as_str());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod executor;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::Engine;
pub use domain::errors::{ContractError, DomainError, DomainResult};
pub use domain::models::{
    Config, ExecutionIncident, ExecutionMode, ExecutionRun, ExecutionTask, FailureClass,
    FailureClassification, RobotPlan, RunStatus, TaskStatus, WorkerId,
};
pub use domain::ports::{EntityStore, ExecutionBackend, RecordStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ExecutionOrchestrator, ExecutionTaskService, WorkerManager};
