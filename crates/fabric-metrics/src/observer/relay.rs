//! Relay to an external metrics backend.
//!
//! [`RelayObserver::observe`] only does a `try_send` into the relay's own
//! queue. A background task owns the [`MetricsSink`]: it forwards each event
//! as soon as it arrives and, on every tick of the flush interval, pushes a
//! [`RuntimeSample`] and flushes the sink. Backend failures are logged and
//! the event is gone; nothing is retried and nothing flows back upstream.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Observer;
use crate::event::MetricEvent;
use crate::runtime::RuntimeSample;
use crate::sink::{MetricsSink, relay_event};

/// Default relay queue depth.
pub const DEFAULT_RELAY_CAPACITY: usize = 1024;

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Relay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Runtime push + flush period.
    pub interval: Duration,
    /// Events buffered between the bus and the sink.
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FLUSH_INTERVAL,
            capacity: DEFAULT_RELAY_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct RelayCounters {
    pushed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
}

/// Relay counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Events the sink accepted.
    pub pushed: u64,
    /// Events or flushes the sink rejected.
    pub failed: u64,
    /// Events dropped before reaching the sink (queue full or closed).
    pub dropped: u64,
    /// Completed flush ticks.
    pub flushes: u64,
}

/// Observer that streams events to a [`MetricsSink`].
pub struct RelayObserver {
    sink_name: &'static str,
    tx: mpsc::Sender<MetricEvent>,
    closing: CancellationToken,
    counters: Arc<RelayCounters>,
}

impl RelayObserver {
    /// Start the relay's background task.
    ///
    /// The task stops after [`Observer::close`] (the bus calls it once the
    /// final event was dispatched) or once the observer is dropped, draining
    /// whatever is still queued.
    pub fn spawn<S: MetricsSink>(sink: S, config: RelayConfig) -> (Self, JoinHandle<RelayStats>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let closing = CancellationToken::new();
        let counters = Arc::new(RelayCounters::default());
        let sink_name = sink.name();

        let handle = tokio::spawn(run(
            sink,
            rx,
            closing.clone(),
            Arc::clone(&counters),
            config.interval.max(Duration::from_millis(1)),
        ));

        debug!(sink = sink_name, interval = ?config.interval, "metrics relay started");
        (
            Self {
                sink_name,
                tx,
                closing,
                counters,
            },
            handle,
        )
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }
}

impl RelayCounters {
    fn snapshot(&self) -> RelayStats {
        RelayStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

impl Observer for RelayObserver {
    fn observe(&self, event: &MetricEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn close(&self) {
        self.closing.cancel();
    }

    fn name(&self) -> &'static str {
        self.sink_name
    }
}

impl Drop for RelayObserver {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}

async fn run<S: MetricsSink>(
    sink: S,
    mut rx: mpsc::Receiver<MetricEvent>,
    closing: CancellationToken,
    counters: Arc<RelayCounters>,
    interval: Duration,
) -> RelayStats {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(event) => push(&sink, &event, &counters),
                None => break,
            },
            _ = ticker.tick() => flush(&sink, &counters),
        }
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        push(&sink, &event, &counters);
    }
    if let Err(e) = sink.flush() {
        warn!(sink = sink.name(), error = %e, code = e.error_code(), "final sink flush failed");
    }

    let stats = counters.snapshot();
    info!(
        sink = sink.name(),
        pushed = stats.pushed,
        failed = stats.failed,
        dropped = stats.dropped,
        "metrics relay stopped"
    );
    stats
}

fn push<S: MetricsSink>(sink: &S, event: &MetricEvent, counters: &RelayCounters) {
    match relay_event(sink, event) {
        Ok(()) => {
            counters.pushed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                sink = sink.name(),
                key = %event.key,
                kind = %event.kind,
                error = %e,
                code = e.error_code(),
                "metrics sink push failed, event dropped"
            );
        }
    }
}

fn flush<S: MetricsSink>(sink: &S, counters: &RelayCounters) {
    let result = sink
        .push_runtime(&RuntimeSample::capture())
        .and_then(|()| sink.flush());
    match result {
        Ok(()) => {
            counters.flushes.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(sink = sink.name(), error = %e, code = e.error_code(), "metrics sink flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::key::{MetricKey, Tag};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        counters: Mutex<Vec<f64>>,
        gauges: Mutex<Vec<String>>,
        fail: bool,
    }

    impl MetricsSink for Recording {
        fn incr_counter(&self, _key: &MetricKey, value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            if self.fail {
                return Err(std::io::Error::other("backend down").into());
            }
            self.counters.lock().push(value);
            Ok(())
        }

        fn set_gauge(&self, key: &MetricKey, _value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            self.gauges.lock().push(key.to_string());
            Ok(())
        }

        fn add_sample(&self, _key: &MetricKey, _seconds: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn hit(n: i64) -> MetricEvent {
        MetricEvent::counter(MetricKey::from_pairs([("service", "x")]), n).unwrap()
    }

    #[tokio::test]
    async fn forwards_events_and_drains_on_close() {
        let sink = Arc::new(Recording::default());
        let (relay, handle) = RelayObserver::spawn(
            Arc::clone(&sink),
            RelayConfig {
                interval: Duration::from_secs(3600),
                capacity: 16,
            },
        );

        for n in 1..=3 {
            relay.observe(&hit(n));
        }
        relay.close();
        let stats = handle.await.unwrap();

        assert_eq!(stats.pushed, 3);
        assert_eq!(*sink.counters.lock(), vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let sink = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let (relay, handle) = RelayObserver::spawn(Arc::clone(&sink), RelayConfig::default());

        relay.observe(&hit(1));
        relay.observe(&hit(2));
        drop(relay);
        let stats = handle.await.unwrap();

        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_pushes_runtime_sample() {
        let sink = Arc::new(Recording::default());
        let (relay, handle) = RelayObserver::spawn(
            Arc::clone(&sink),
            RelayConfig {
                interval: Duration::from_secs(5),
                capacity: 4,
            },
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        let flushes = relay.stats().flushes;
        relay.close();
        handle.await.unwrap();

        assert_eq!(flushes, 2);
        assert!(
            sink.gauges
                .lock()
                .iter()
                .any(|k| k == "name/process.uptime_seconds")
        );
    }

    #[tokio::test]
    async fn full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let relay = RelayObserver {
            sink_name: "recording",
            tx,
            closing: CancellationToken::new(),
            counters: Arc::new(RelayCounters::default()),
        };
        relay.observe(&hit(1));
        relay.observe(&hit(2));
        assert_eq!(relay.stats().dropped, 1);
    }
}
