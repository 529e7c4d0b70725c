//! Test server management.
//!
//! Writes a config file into a temporary directory, loads it the same way
//! `main` does and starts the daemon in-process on ephemeral ports.

#![allow(dead_code)]

use fabricd::config::{self, Config};
use fabricd::daemon::{Daemon, ShutdownReport};
use fabricd::error::StartupError;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A test daemon instance.
pub struct TestServer {
    pub daemon: Daemon,
    pub config: Config,
    _dir: TempDir,
}

/// Minimal config with both listeners on ephemeral ports; `extra` is
/// appended verbatim.
pub fn config_text(extra: &str) -> String {
    format!(
        r#"
[service]
name = "billing"
host = "test-host"

[transport]
address = "127.0.0.1:0"

[metrics]
address = "127.0.0.1:0"
{extra}
"#
    )
}

/// Write `text` to a config file and load it.
pub fn load_config(text: &str) -> anyhow::Result<(Config, TempDir)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fabricd.toml");
    std::fs::write(&path, text)?;
    let config = Config::load(&path)?;
    if let Err(errors) = config::validate(&config) {
        anyhow::bail!("invalid test config: {errors:?}");
    }
    Ok((config, dir))
}

impl TestServer {
    /// Spawn a daemon with `extra` appended under `[metrics]`.
    pub async fn spawn(extra: &str) -> anyhow::Result<Self> {
        let (config, dir) = load_config(&config_text(extra))?;
        let daemon = Daemon::start(&config, CancellationToken::new()).await?;
        Ok(Self {
            daemon,
            config,
            _dir: dir,
        })
    }

    /// Try to spawn from a full config text; returns the startup error.
    pub async fn try_spawn_raw(text: &str) -> Result<Self, StartupError> {
        let (config, dir) = load_config(text).expect("bad test config");
        let daemon = Daemon::start(&config, CancellationToken::new()).await?;
        Ok(Self {
            daemon,
            config,
            _dir: dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.daemon.metrics_addr(), path)
    }

    /// Cancel and wait for every task.
    pub async fn stop(self) -> ShutdownReport {
        self.daemon.shutdown(Duration::from_secs(5)).await
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
