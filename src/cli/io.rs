//! JSON output for CLI
//!
//! Every command prints exactly one JSON object on stdout. Logs go to
//! stderr.

use std::io::{self, Write};

use serde_json::{json, Value};

use super::errors::CliResult;

/// Write a JSON response to stdout
pub fn write_response(value: Value) -> CliResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", serde_json::to_string(&value)?)?;
    handle.flush()?;
    Ok(())
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_response(json!({
        "error": {
            "code": code,
            "message": message,
        }
    }))
}
