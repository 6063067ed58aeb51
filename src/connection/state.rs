//! Connection state and status types

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Connectivity of the manager's current pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The reconnect loop is armed
    Reconnecting,
    /// A connect attempt failed after shutdown; no loop is armed
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Failed => "FAILED",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inputs to the single state-transition function.
///
/// Pool errors reported by callers and failed health probes both arrive as
/// `Fault`; a successful health probe arrives as `Restored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Fault(String),
    Restored,
}

/// Timing parameters of the manager's background loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Consecutive failures before the delay is stretched
    pub max_reconnect_attempts: u32,
    /// Factor applied to `reconnect_delay` after `max_reconnect_attempts`
    pub backoff_multiplier: u32,
    pub health_interval: Duration,
    /// Bound on status queries and health probes
    pub status_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            backoff_multiplier: 3,
            health_interval: Duration::from_secs(30),
            status_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectionSettings {
    /// Retry period once the attempt budget is exhausted
    pub fn escalated_delay(&self) -> Duration {
        self.reconnect_delay * self.backoff_multiplier
    }
}

/// Structured status report; produced even when the store is unreachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub record_count: u64,
    pub is_connected: bool,
    pub connection_error: Option<String>,
    pub reconnecting: bool,
}
