//! CLI command implementations.

pub mod adapter;
pub mod execution;
pub mod incident;
pub mod ops;
pub mod plan;
pub mod serve;
pub mod task;
pub mod worker;

use anyhow::Result;

use crate::application::Engine;
use crate::cli::types::Commands;

/// Route a parsed command to its implementation.
pub async fn dispatch(engine: &Engine, command: Commands, json_mode: bool) -> Result<()> {
    match command {
        Commands::Plan(cmd) => plan::execute(engine, cmd, json_mode).await,
        Commands::Execute {
            robot_plan_id,
            mode,
            params,
        } => {
            execution::submit(engine, &robot_plan_id, mode.as_deref(), params.as_deref(), json_mode).await
        }
        Commands::Execution(cmd) => execution::execute(engine, cmd, json_mode).await,
        Commands::Task(cmd) => task::execute(engine, cmd, json_mode).await,
        Commands::Worker(cmd) => worker::execute(engine, cmd, json_mode).await,
        Commands::Incident(cmd) => incident::execute(engine, cmd, json_mode).await,
        Commands::Adapter(cmd) => adapter::execute(engine, cmd, json_mode).await,
        Commands::Ops => ops::execute(engine, json_mode).await,
        Commands::Serve {
            no_restore,
            with_executor,
        } => serve::serve(engine, no_restore, with_executor).await,
        Commands::Executor { once } => serve::executor(engine, once, json_mode).await,
    }
}
