//! labexec CLI entry point.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use labexec::application::Engine;
use labexec::cli::{commands, handle_error, Cli};
use labexec::domain::models::Config;
use labexec::infrastructure::config::ConfigLoader;
use labexec::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = handle_error(&err, json_mode);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::load_from(&cli.project_dir)?;
    resolve_paths(&mut config, &cli.project_dir);

    // Held until exit so buffered file output is flushed.
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    let engine = Engine::open(config, cli.ephemeral).await?;
    commands::dispatch(&engine, cli.command, cli.json).await
}

/// Relative database and log paths are relative to the project directory.
fn resolve_paths(config: &mut Config, project_dir: &Path) {
    let database = Path::new(&config.database.path);
    if database.is_relative() && config.database.path != ":memory:" {
        config.database.path = project_dir.join(database).to_string_lossy().into_owned();
    }
    if let Some(log_dir) = &config.logging.log_dir {
        let log_dir = Path::new(log_dir);
        if log_dir.is_relative() {
            config.logging.log_dir = Some(project_dir.join(log_dir).to_string_lossy().into_owned());
        }
    }
}
