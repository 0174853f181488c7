//! Executor side of the execution task protocol.
//!
//! A [`ClaimLoop`] claims queued tasks through an [`ExecutionTaskApi`],
//! runs each one with the [`TaskRunner`] registered for its adapter and
//! reports heartbeat, logs, status and completion with strictly
//! increasing sequence numbers.

pub mod api;
pub mod claim_loop;
pub mod runner;

pub use api::{ExecutionTaskApi, InProcessTaskApi};
pub use claim_loop::{ClaimCycleReport, ClaimLoop};
pub use runner::{RunnerRegistry, SimulatedRunner, TaskOutcome, TaskRunner};
