//! Native tool availability detection

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Detects whether the native dump and restore executables can be started.
///
/// The answer is computed once and kept for the life of the detector: tools
/// do not appear or disappear without a restart.
#[derive(Debug)]
pub struct ToolDetector {
    candidates: Vec<String>,
    timeout: Duration,
    known: OnceCell<bool>,
}

impl ToolDetector {
    pub fn new(candidates: Vec<String>, timeout: Duration) -> Self {
        Self {
            candidates,
            timeout,
            known: OnceCell::new(),
        }
    }

    /// A detector whose answer is fixed up front
    pub fn with_known(available: bool) -> Self {
        Self {
            candidates: Vec::new(),
            timeout: Duration::ZERO,
            known: OnceCell::new_with(Some(available)),
        }
    }

    /// Whether every candidate tool starts. Probes on first call only.
    pub async fn detect(&self) -> bool {
        *self
            .known
            .get_or_init(|| async {
                let mut available = !self.candidates.is_empty();
                for tool in &self.candidates {
                    if !self.probe(tool).await {
                        available = false;
                        break;
                    }
                }
                info!(available, tools = ?self.candidates, "native tool detection finished");
                available
            })
            .await
    }

    /// The memoized answer, if detection already ran
    pub fn cached(&self) -> Option<bool> {
        self.known.get().copied()
    }

    /// Any successful start counts, whatever the exit code.
    async fn probe(&self, tool: &str) -> bool {
        let child = Command::new(tool)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!(tool, error = %e, "tool failed to start");
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(_status)) => true,
            Ok(Err(e)) => {
                debug!(tool, error = %e, "waiting on tool failed");
                false
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                debug!(tool, timeout_ms, "tool probe timed out");
                let _ = child.start_kill();
                false
            }
        }
    }
}
