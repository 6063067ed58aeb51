//! Native database tools
//!
//! Backup and restore prefer the host's dump/restore executables when they
//! exist. [`ToolDetector`] decides that once per process; [`ToolRunner`]
//! builds and runs the invocations with a hard timeout.

mod detector;
mod errors;
mod runner;

pub use detector::ToolDetector;
pub use errors::{ToolError, ToolResult};
pub use runner::ToolRunner;
