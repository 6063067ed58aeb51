//! pixelvault CLI entry point
//!
//! Installs the log subscriber, then delegates everything to the CLI module.
//! Logs go to stderr; command output goes to stdout as JSON.

use pixelvault::cli;
use tracing_subscriber::EnvFilter;

/// Variable holding the log filter, e.g. `PIXELVAULT_LOG=pixelvault=debug`
const LOG_ENV: &str = "PIXELVAULT_LOG";

fn main() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
