//! Integrity monitoring
//!
//! # Classification
//!
//! Each tick compares the current record count with the last known one:
//!
//! | last known        | current                     | classification |
//! |-------------------|-----------------------------|----------------|
//! | `> 0`             | `0`                         | catastrophic   |
//! | `> floor`         | `< last known * ratio`      | partial loss   |
//! | anything else     |                             | drift          |
//!
//! Catastrophic loss restores the newest artifact after re-verifying
//! connectivity. Artifacts whose header declares zero records are passed
//! over. Partial loss is only logged.

mod errors;
mod incident;
mod monitor;

pub use errors::{IntegrityError, IntegrityResult};
pub use incident::{FileIncidentLog, IncidentKind, IncidentLog, IncidentRecord, MemoryIncidentLog};
pub use monitor::{IntegrityMonitor, TickOutcome};

use serde::Serialize;

/// Partial-loss thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntegrityThresholds {
    /// Partial loss is only considered when the last known count exceeds this
    pub partial_loss_floor: u64,
    /// Partial loss when the count falls below this fraction of the last one
    pub partial_loss_ratio: f64,
}

impl Default for IntegrityThresholds {
    fn default() -> Self {
        Self {
            partial_loss_floor: 10,
            partial_loss_ratio: 0.5,
        }
    }
}

/// Classification of a count change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    None,
    PartialLoss,
    Catastrophic,
}

pub fn classify(previous: u64, current: u64, thresholds: &IntegrityThresholds) -> Anomaly {
    if previous > 0 && current == 0 {
        return Anomaly::Catastrophic;
    }
    if previous > thresholds.partial_loss_floor
        && (current as f64) < previous as f64 * thresholds.partial_loss_ratio
    {
        return Anomaly::PartialLoss;
    }
    Anomaly::None
}
