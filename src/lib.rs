//! fabricd - service daemon around the fabric metrics bus.
//!
//! The binary in `main.rs` only loads configuration and drives
//! [`daemon::Daemon`]; everything else lives here so integration tests can
//! start the daemon in-process.

pub mod announce;
pub mod config;
pub mod daemon;
pub mod error;
pub mod http;
pub mod network;
pub mod telemetry;
