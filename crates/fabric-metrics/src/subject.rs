//! The metrics bus.
//!
//! Producers hand events to an [`Ingress`] handle; one dispatch task fans
//! each event out to every registered [`Observer`] in registration order.
//!
//! Hand-off is a `try_send` into a bounded queue. A full queue drops the
//! event and bumps a counter, so a slow or wedged observer can only cost
//! data, never producer latency.

use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::error::DropReason;
use crate::event::MetricEvent;
use crate::observer::Observer;

/// Default ingress queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Outcome of a [`Ingress::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignore with `let _ =` if the drop outcome does not matter"]
pub enum Submitted {
    /// Queued for dispatch.
    Accepted,
    /// Dropped; only visible through [`Ingress::stats`].
    Dropped(DropReason),
}

impl Submitted {
    /// `true` when the event was queued.
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug, Default)]
struct IngressCounters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    dropped_saturated: AtomicU64,
    dropped_closed: AtomicU64,
}

/// Point-in-time copy of the ingress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngressStats {
    /// Every `submit` call.
    pub submitted: u64,
    /// Events that made it into the queue.
    pub accepted: u64,
    /// Events dropped because the queue was full.
    pub dropped_saturated: u64,
    /// Events dropped because the bus had shut down.
    pub dropped_closed: u64,
}

impl IngressStats {
    /// Total dropped events.
    pub fn dropped(&self) -> u64 {
        self.dropped_saturated + self.dropped_closed
    }
}

/// Producer-side handle to the bus. Cheap to clone.
#[derive(Clone)]
pub struct Ingress {
    tx: mpsc::Sender<MetricEvent>,
    token: CancellationToken,
    counters: Arc<IngressCounters>,
}

impl Ingress {
    /// Hand an event to the bus without blocking.
    pub fn submit(&self, event: MetricEvent) -> Submitted {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if self.token.is_cancelled() {
            return self.dropped(DropReason::Closed);
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Submitted::Accepted
            }
            Err(TrySendError::Full(event)) => {
                trace!(key = %event.key, kind = %event.kind, "metrics queue saturated, dropping event");
                self.dropped(DropReason::Saturated)
            }
            Err(TrySendError::Closed(_)) => self.dropped(DropReason::Closed),
        }
    }

    fn dropped(&self, reason: DropReason) -> Submitted {
        let counter = match reason {
            DropReason::Saturated => &self.counters.dropped_saturated,
            DropReason::Closed => &self.counters.dropped_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Submitted::Dropped(reason)
    }

    /// Snapshot of the ingress counters.
    pub fn stats(&self) -> IngressStats {
        IngressStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped_saturated: self.counters.dropped_saturated.load(Ordering::Relaxed),
            dropped_closed: self.counters.dropped_closed.load(Ordering::Relaxed),
        }
    }

    /// `true` once the bus stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}

impl std::fmt::Debug for Ingress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingress")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Totals reported by the dispatch task when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Events delivered to the observer set.
    pub delivered: u64,
    /// Events delivered after cancellation, during the drain phase.
    pub drained: u64,
    /// Observer invocations that panicked.
    pub observer_panics: u64,
}

/// The bus before it starts running.
pub struct Subject {
    token: CancellationToken,
    observers: Vec<Arc<dyn Observer>>,
    capacity: usize,
}

impl Subject {
    /// Bind a bus to `token` with a fixed observer set.
    pub fn new(token: CancellationToken, observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            token,
            observers,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Override the ingress queue depth (minimum 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start the dispatch task.
    ///
    /// The task stops when the token is cancelled (after draining the queue)
    /// or when every [`Ingress`] clone has been dropped.
    pub fn spawn(self) -> (Ingress, JoinHandle<DispatchStats>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let ingress = Ingress {
            tx,
            token: self.token.clone(),
            counters: Arc::new(IngressCounters::default()),
        };

        debug!(
            observers = self.observers.len(),
            capacity = self.capacity,
            "metrics bus starting"
        );
        let handle = tokio::spawn(dispatch(rx, self.token, self.observers));
        (ingress, handle)
    }
}

/// Shorthand for `Subject::new(token, observers).spawn()`.
pub fn spawn(
    token: CancellationToken,
    observers: Vec<Arc<dyn Observer>>,
) -> (Ingress, JoinHandle<DispatchStats>) {
    Subject::new(token, observers).spawn()
}

async fn dispatch(
    mut rx: mpsc::Receiver<MetricEvent>,
    token: CancellationToken,
    observers: Vec<Arc<dyn Observer>>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(event) => deliver(&observers, &event, &mut stats),
                None => break,
            },
        }
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        deliver(&observers, &event, &mut stats);
        stats.drained += 1;
    }

    for observer in &observers {
        observer.close();
    }

    info!(
        delivered = stats.delivered,
        drained = stats.drained,
        observer_panics = stats.observer_panics,
        "metrics bus stopped"
    );
    stats
}

fn deliver(observers: &[Arc<dyn Observer>], event: &MetricEvent, stats: &mut DispatchStats) {
    for observer in observers {
        if catch_unwind(AssertUnwindSafe(|| observer.observe(event))).is_err() {
            stats.observer_panics += 1;
            error!(observer = observer.name(), key = %event.key, "observer panicked, event skipped for it");
        }
    }
    stats.delivered += 1;
}
