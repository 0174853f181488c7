//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "labexec")]
#[command(about = "labexec - execution orchestration for laboratory robot plans", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Project directory containing `.labexec/`
    #[arg(long, global = true, default_value = ".", env = "LABEXEC_PROJECT_DIR")]
    pub project_dir: PathBuf,

    /// Keep all records in memory for this invocation
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Robot plan records
    #[command(subcommand)]
    Plan(PlanCommands),

    /// Submit a robot plan for execution
    Execute {
        /// Robot plan ID
        robot_plan_id: String,

        /// Execution mode override (sidecar, direct_http, two_step_http, simulator, remote_executor)
        #[arg(short, long)]
        mode: Option<String>,

        /// Runtime parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },

    /// Execution run inspection and control
    #[command(subcommand)]
    Execution(ExecutionCommands),

    /// Execution tasks for out-of-process executors
    #[command(subcommand)]
    Task(TaskCommands),

    /// Leased background workers
    #[command(subcommand)]
    Worker(WorkerCommands),

    /// Execution incidents
    #[command(subcommand)]
    Incident(IncidentCommands),

    /// Adapter bridges
    #[command(subcommand)]
    Adapter(AdapterCommands),

    /// Combined operations snapshot
    Ops,

    /// Run the background workers until interrupted
    Serve {
        /// Do not resume workers from their persisted leases
        #[arg(long)]
        no_restore: bool,

        /// Also run an in-process executor claim loop
        #[arg(long)]
        with_executor: bool,
    },

    /// Run an executor claim loop against this project's task queue
    Executor {
        /// Claim and process once, then exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Import robot plans from a JSON or YAML file (one plan or a list)
    Import {
        /// Path to the plan file
        file: PathBuf,
    },

    /// List robot plans
    List {
        /// Maximum number of plans to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Execution history of a robot plan
    Status {
        /// Robot plan ID
        robot_plan_id: String,
    },

    /// Cancel the running execution of a robot plan
    Cancel {
        /// Robot plan ID
        robot_plan_id: String,
    },

    /// List execution runs
    List {
        /// Filter by status (running, completed, failed, canceled)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of runs to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show one execution run
    Show {
        /// Execution run ID
        run_id: String,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Queue a robot plan for a remote executor
    Queue {
        /// Robot plan ID
        robot_plan_id: String,

        /// Runtime parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Execution run this attempt retries
        #[arg(long)]
        parent: Option<String>,
    },

    /// List execution tasks
    List {
        /// Filter by status (queued, claimed, running, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one execution task
    Show {
        /// Task ID
        task_id: String,
    },

    /// Show the instrument log of a task
    Logs {
        /// Task ID
        task_id: String,
    },
}

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// Show worker status (all workers when none is given)
    Status {
        /// Worker ID (execution-poller, retry-worker, incident-scanner)
        worker: Option<String>,
    },

    /// Run a single tick now
    RunOnce {
        /// Worker ID
        worker: String,
    },

    /// Run a worker in the foreground until interrupted
    Start {
        /// Worker ID
        worker: String,

        /// Tick interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Take the lease even if another owner holds it
        #[arg(long)]
        takeover: bool,
    },

    /// Take over a worker's lease and run it in the foreground
    Takeover {
        /// Worker ID
        worker: String,

        /// Tick interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// List persisted worker leases
    Leases,
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// Scan for new incidents now
    Scan,

    /// List incidents, newest first
    List {
        /// Filter by status (open, acked, resolved)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one incident
    Show {
        /// Incident ID
        incident_id: String,
    },

    /// Acknowledge an open incident
    Ack {
        /// Incident ID
        incident_id: String,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Resolve an incident
    Resolve {
        /// Incident ID
        incident_id: String,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Incident counts by status and type
    Summary,
}

#[derive(Subcommand)]
pub enum AdapterCommands {
    /// List configured adapters
    List,

    /// Probe every adapter and record its health
    Health,
}
