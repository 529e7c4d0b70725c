//! Process runtime sampling.
//!
//! [`RuntimeSample::capture`] reads the cheap process-wide numbers (uptime,
//! threads, memory, tokio scheduler state). Relays push it on every flush
//! tick, and [`spawn_runtime_sampler`] feeds it into the bus as gauges so
//! the dashboard sees it too.

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::StatsApi;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Record the process start instant. Later calls are no-ops.
pub fn mark_process_start() {
    PROCESS_START.get_or_init(Instant::now);
}

fn uptime() -> Duration {
    PROCESS_START.get_or_init(Instant::now).elapsed()
}

/// Cumulative process counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RuntimeSample {
    /// Seconds since [`mark_process_start`] (or the first capture).
    pub uptime_secs: f64,
    /// OS threads in the process.
    pub threads: Option<u64>,
    /// Resident set size in bytes.
    pub resident_bytes: Option<u64>,
    /// Virtual memory size in bytes.
    pub virtual_bytes: Option<u64>,
    /// Tokio worker threads of the current runtime.
    pub tokio_workers: Option<usize>,
    /// Tasks alive on the current runtime.
    pub tokio_alive_tasks: Option<usize>,
}

impl RuntimeSample {
    /// Read the current values. Fields the platform cannot report stay `None`.
    pub fn capture() -> Self {
        let mut sample = Self {
            uptime_secs: uptime().as_secs_f64(),
            ..Self::default()
        };

        if let Some(status) = read_proc_status() {
            sample.threads = status.threads;
            sample.resident_bytes = status.resident_bytes;
            sample.virtual_bytes = status.virtual_bytes;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let metrics = handle.metrics();
            sample.tokio_workers = Some(metrics.num_workers());
            sample.tokio_alive_tasks = Some(metrics.num_alive_tasks());
        }

        sample
    }

    /// Available values as `(name, value)` gauge pairs.
    pub fn gauges(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![("runtime.uptime_seconds", self.uptime_secs)];
        let optional = [
            ("runtime.threads", self.threads.map(|v| v as f64)),
            ("runtime.resident_bytes", self.resident_bytes.map(|v| v as f64)),
            ("runtime.virtual_bytes", self.virtual_bytes.map(|v| v as f64)),
            ("runtime.tokio_workers", self.tokio_workers.map(|v| v as f64)),
            ("runtime.tokio_alive_tasks", self.tokio_alive_tasks.map(|v| v as f64)),
        ];
        out.extend(optional.into_iter().filter_map(|(name, v)| v.map(|v| (name, v))));
        out
    }
}

#[derive(Debug, Default, PartialEq)]
struct ProcStatus {
    threads: Option<u64>,
    resident_bytes: Option<u64>,
    virtual_bytes: Option<u64>,
}

#[cfg(target_os = "linux")]
fn read_proc_status() -> Option<ProcStatus> {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .map(|raw| parse_proc_status(&raw))
}

#[cfg(not(target_os = "linux"))]
fn read_proc_status() -> Option<ProcStatus> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_status(raw: &str) -> ProcStatus {
    fn kib(rest: &str) -> Option<u64> {
        rest.split_whitespace()
            .next()?
            .parse::<u64>()
            .ok()
            .map(|v| v * 1024)
    }

    let mut status = ProcStatus::default();
    for line in raw.lines() {
        let Some((field, rest)) = line.split_once(':') else {
            continue;
        };
        match field {
            "Threads" => status.threads = rest.trim().parse().ok(),
            "VmRSS" => status.resident_bytes = kib(rest),
            "VmSize" => status.virtual_bytes = kib(rest),
            _ => {}
        }
    }
    status
}

/// Periodically emit [`RuntimeSample`] gauges through `stats` until
/// `token` is cancelled.
pub fn spawn_runtime_sampler(
    stats: Arc<dyn StatsApi>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    for (name, value) in RuntimeSample::capture().gauges() {
                        stats.set_gauge(&[name], value);
                    }
                }
            }
        }
        debug!("runtime sampler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tfabricd\nVmSize:\t  204800 kB\nVmRSS:\t   10240 kB\nThreads:\t7\n";

    #[test]
    fn parses_proc_status_fields() {
        let status = parse_proc_status(STATUS);
        assert_eq!(status.threads, Some(7));
        assert_eq!(status.resident_bytes, Some(10240 * 1024));
        assert_eq!(status.virtual_bytes, Some(204800 * 1024));
    }

    #[test]
    fn missing_fields_stay_none() {
        assert_eq!(parse_proc_status("Name:\tx\n"), ProcStatus::default());
    }

    #[test]
    fn gauges_skip_unknown_values() {
        let sample = RuntimeSample {
            uptime_secs: 3.0,
            threads: Some(4),
            ..RuntimeSample::default()
        };
        let gauges = sample.gauges();
        assert_eq!(
            gauges,
            vec![("runtime.uptime_seconds", 3.0), ("runtime.threads", 4.0)]
        );
    }

    #[tokio::test]
    async fn capture_inside_runtime_reports_workers() {
        let sample = RuntimeSample::capture();
        assert!(sample.tokio_workers.is_some());
        assert!(sample.uptime_secs >= 0.0);
    }
}
