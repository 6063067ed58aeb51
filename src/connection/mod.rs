//! Connection management
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                              │                 │
//!                              │ err             │ fault (pool error,
//!                              │                 │ failed health probe,
//!                              ▼                 ▼ failed status query)
//!                           Reconnecting ──attempt ok / probe ok──▶ Connected
//! ```
//!
//! `Failed` is only reached by a connect attempt on a manager that was shut
//! down; nothing retries from there.
//!
//! The reconnect loop retries every `reconnect_delay`. After
//! `max_reconnect_attempts` consecutive failures the delay is multiplied by
//! `backoff_multiplier` and the counter starts over; the loop never gives up.
//!
//! The health loop is independent of the reconnect loop: it notices silent
//! degradation that no caller reported, and it can also observe recovery
//! before the reconnect loop's next attempt.

mod manager;
mod state;

pub use manager::ConnectionManager;
pub use state::{ConnectionSettings, ConnectionState, ConnectionStatus, Signal};
