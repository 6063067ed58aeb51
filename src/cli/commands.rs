//! CLI command implementations
//!
//! Each command loads the configuration, builds a Tokio runtime and talks
//! to PostgreSQL through [`PgConnector`]. One-shot commands connect without
//! starting the background loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::integrity::MemoryIncidentLog;
use crate::retention::RetentionManager;
use crate::store::StoreConnector;
use crate::store::PgConnector;
use crate::subsystem::Resilience;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run { config } => serve(&config),
        Command::Backup { config, out } => backup(&config, out),
        Command::Restore { config, path } => restore(&config, &path),
        Command::Status { config } => status(&config),
        Command::Clean { config, keep } => clean(&config, keep),
        Command::Tools { config } => tools(&config),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to create tokio runtime: {}", e)))
}

fn connector(config: &Config) -> CliResult<PgConnector> {
    PgConnector::from_config(&config.database)
        .map_err(|e| CliError::config_error(format!("{} ({})", e, e.code())))
}

/// Subsystem for a one-shot command; background loops stay stopped. Must be
/// called inside the runtime.
fn one_shot(config: Config) -> CliResult<Resilience<PgConnector>> {
    let connector = connector(&config)?;
    Ok(Resilience::assemble(
        config,
        connector,
        Arc::new(MemoryIncidentLog::new()),
    ))
}

async fn connect(subsystem: &Resilience<PgConnector>) -> CliResult<()> {
    if let Err(e) = subsystem.manager().connect().await {
        subsystem.shutdown().await;
        return Err(CliError::connect_failed(format!("{} ({})", e, e.code())));
    }
    Ok(())
}

/// Bootstrap and serve until Ctrl-C
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let connector = connector(&config)?;

    runtime()?.block_on(async {
        let subsystem = Resilience::bootstrap(config, connector).await?;
        write_response(json!({
            "running": true,
            "target": subsystem.manager().connector().describe(),
        }))?;

        tokio::signal::ctrl_c().await?;
        info!("interrupt received; shutting down");
        subsystem.shutdown().await;
        Ok::<(), CliError>(())
    })
}

/// Export one artifact
pub fn backup(config_path: &Path, out: Option<PathBuf>) -> CliResult<()> {
    let config = Config::load(config_path)?;

    runtime()?.block_on(async {
        let subsystem = one_shot(config)?;
        connect(&subsystem).await?;
        let result = subsystem.export_backup(out.as_deref()).await;
        subsystem.shutdown().await;
        let outcome = result?;

        write_response(json!({
            "path": outcome.path,
            "record_count": outcome.record_count,
            "strategy": outcome.strategy,
        }))
    })
}

/// Import one artifact
pub fn restore(config_path: &Path, path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;

    runtime()?.block_on(async {
        let subsystem = one_shot(config)?;
        connect(&subsystem).await?;
        let result = subsystem.import_backup(path).await;
        subsystem.shutdown().await;
        let outcome = result?;

        write_response(json!({
            "imported": outcome.imported,
            "skipped": outcome.skipped,
            "errors": outcome.errors,
            "strategy": outcome.strategy,
        }))
    })
}

/// Report status. Never fails on connectivity; the report says what is wrong.
pub fn status(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;

    runtime()?.block_on(async {
        let subsystem = one_shot(config)?;
        let connect_error = subsystem.manager().connect().await.err();
        let status = subsystem.status().await;
        let state = subsystem.manager().state();
        subsystem.shutdown().await;

        write_response(json!({
            "record_count": status.record_count,
            "is_connected": status.is_connected,
            "connection_error": status
                .connection_error
                .or_else(|| connect_error.map(|e| e.to_string())),
            "reconnecting": status.reconnecting,
            "state": state,
        }))
    })
}

/// Apply retention without connecting
pub fn clean(config_path: &Path, keep: Option<usize>) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let keep = keep.unwrap_or(config.backups.keep);
    let report = RetentionManager::new(&config.backups.dir).clean(keep)?;

    write_response(json!({
        "kept": report.kept,
        "removed": report.removed,
        "failed": report
            .failed
            .iter()
            .map(|(path, reason)| json!({"path": path, "reason": reason}))
            .collect::<Vec<_>>(),
    }))
}

/// Detect the native tools
pub fn tools(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;

    runtime()?.block_on(async {
        let subsystem = one_shot(config)?;
        let available = subsystem.tools().detect().await;
        write_response(json!({
            "available": available,
            "use_native_tools": subsystem.config().backups.use_native_tools,
            "dump_binary": subsystem.config().backups.dump_binary,
            "restore_binary": subsystem.config().backups.restore_binary,
        }))
    })
}
