//! Startup errors for fabricd.
//!
//! Everything here is fatal: `main` logs it and exits. Errors raised after
//! startup stay inside the task that hit them.

use std::net::SocketAddr;
use thiserror::Error;

use crate::announce::AnnounceError;

/// Errors that abort daemon startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {what} listener on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open statsd socket to {addr}: {source}")]
    Statsd {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service announcement failed: {0}")]
    Announce(#[from] AnnounceError),
}

impl StartupError {
    /// Get a static error code string for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind_failed",
            Self::Statsd { .. } => "statsd_unavailable",
            Self::Announce(_) => "announcement_failed",
        }
    }
}
