//! Command-line parsing.

use clap::Parser;

use labexec::cli::types::{ExecutionCommands, IncidentCommands, WorkerCommands};
use labexec::cli::{Cli, Commands};

#[test]
fn test_execute_with_overrides() {
    let cli = Cli::try_parse_from([
        "labexec",
        "execute",
        "RP-1",
        "--mode",
        "simulator",
        "--params",
        r#"{"plateCount": 2}"#,
        "--json",
    ])
    .unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Execute { robot_plan_id, mode, params } => {
            assert_eq!(robot_plan_id, "RP-1");
            assert_eq!(mode.as_deref(), Some("simulator"));
            assert_eq!(params.as_deref(), Some(r#"{"plateCount": 2}"#));
        }
        _ => panic!("expected execute"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "labexec",
        "execution",
        "list",
        "--status",
        "failed",
        "--project-dir",
        "/tmp/lab",
        "--ephemeral",
    ])
    .unwrap();

    assert!(cli.ephemeral);
    assert_eq!(cli.project_dir, std::path::PathBuf::from("/tmp/lab"));
    match cli.command {
        Commands::Execution(ExecutionCommands::List { status, limit }) => {
            assert_eq!(status.as_deref(), Some("failed"));
            assert_eq!(limit, 50);
        }
        _ => panic!("expected execution list"),
    }
}

#[test]
fn test_worker_start_flags() {
    let cli = Cli::try_parse_from([
        "labexec",
        "worker",
        "start",
        "retry-worker",
        "--interval-ms",
        "1500",
        "--takeover",
    ])
    .unwrap();

    match cli.command {
        Commands::Worker(WorkerCommands::Start { worker, interval_ms, takeover }) => {
            assert_eq!(worker, "retry-worker");
            assert_eq!(interval_ms, Some(1500));
            assert!(takeover);
        }
        _ => panic!("expected worker start"),
    }
}

#[test]
fn test_incident_ack_with_note() {
    let cli = Cli::try_parse_from([
        "labexec", "incident", "ack", "INC-1", "--actor", "ops", "--note", "looking",
    ])
    .unwrap();

    match cli.command {
        Commands::Incident(IncidentCommands::Ack { incident_id, actor, note }) => {
            assert_eq!(incident_id, "INC-1");
            assert_eq!(actor.as_deref(), Some("ops"));
            assert_eq!(note.as_deref(), Some("looking"));
        }
        _ => panic!("expected incident ack"),
    }
}

#[test]
fn test_serve_flags_and_rejections() {
    let cli = Cli::try_parse_from(["labexec", "serve", "--no-restore", "--with-executor"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Serve { no_restore: true, with_executor: true }
    ));

    assert!(Cli::try_parse_from(["labexec"]).is_err());
    assert!(Cli::try_parse_from(["labexec", "execute"]).is_err());
    assert!(Cli::try_parse_from(["labexec", "worker", "start", "poller", "--interval-ms", "soon"]).is_err());
}
