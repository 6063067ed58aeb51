//! pixelvault - persistence resilience for an image store
//!
//! Keeps the relational store reachable through outages, writes and replays
//! portable SQL-text backups, and restores the newest backup automatically
//! when the primary table is found empty.
//!
//! [`subsystem::Resilience`] is the entry point for embedding applications.

pub mod backup;
pub mod cli;
pub mod config;
pub mod connection;
pub mod integrity;
pub mod restore;
pub mod retention;
pub mod sql;
pub mod store;
pub mod subsystem;
pub mod tools;

pub use config::Config;
pub use subsystem::Resilience;
