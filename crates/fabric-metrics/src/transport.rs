//! Per-call instrumentation for the transport layer.
//!
//! [`CallInstrument::begin`] hands out a [`CallTimer`] guard that records
//! the call when dropped, so early returns and `?` still get counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::event::MetricEvent;
use crate::key::{MetricKey, NAME_SEGMENT};
use crate::subject::Ingress;

/// Request counter name.
pub const REQUESTS: &str = "rpc.requests";
/// Latency timing name.
pub const LATENCY: &str = "rpc.latency";
/// Failed request counter name.
pub const ERRORS: &str = "rpc.errors";
/// Inbound byte counter name.
pub const BYTES_RECEIVED: &str = "rpc.bytes_received";
/// Outbound byte counter name.
pub const BYTES_SENT: &str = "rpc.bytes_sent";
/// Accepted connection counter name.
pub const CONNECTIONS: &str = "transport.connections";
/// Open connection gauge name.
pub const ACTIVE_CONNECTIONS: &str = "transport.active_connections";

const STATUS_OK: &str = "ok";

/// Emits transport metrics under a fixed set of base tags.
#[derive(Debug, Clone)]
pub struct CallInstrument {
    ingress: Ingress,
    base: MetricKey,
    active: Arc<AtomicI64>,
}

impl CallInstrument {
    /// Instrument with `base` prepended to every key (typically service and host).
    pub fn new(ingress: Ingress, base: MetricKey) -> Self {
        Self {
            ingress,
            base,
            active: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Start timing one call of `method`.
    pub fn begin(&self, method: impl Into<String>) -> CallTimer {
        CallTimer {
            instrument: self.clone(),
            method: method.into(),
            start: Instant::now(),
            failure: None,
        }
    }

    /// Count bytes moved by one call of `method`. Zero counts are skipped.
    pub fn record_bytes(&self, method: &str, received: u64, sent: u64) {
        for (name, bytes) in [(BYTES_RECEIVED, received), (BYTES_SENT, sent)] {
            if bytes == 0 {
                continue;
            }
            let key = self.method_key(method).with(NAME_SEGMENT, name);
            if let Ok(event) = MetricEvent::counter(key, bytes) {
                let _ = self.ingress.submit(event);
            }
        }
    }

    /// Mark a connection as open until the returned guard is dropped.
    pub fn connection_opened(&self) -> ConnectionGuard {
        if let Ok(event) = MetricEvent::counter(self.named(CONNECTIONS), 1_i64) {
            let _ = self.ingress.submit(event);
        }
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.publish_active(active);
        ConnectionGuard {
            instrument: self.clone(),
        }
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    fn publish_active(&self, active: i64) {
        if let Ok(event) = MetricEvent::gauge(self.named(ACTIVE_CONNECTIONS), active) {
            let _ = self.ingress.submit(event);
        }
    }

    fn named(&self, name: &str) -> MetricKey {
        self.base.clone().with(NAME_SEGMENT, name)
    }

    fn method_key(&self, method: &str) -> MetricKey {
        self.base.clone().with("method", method)
    }

    fn finish(&self, method: &str, start: Instant, failure: Option<&str>) {
        let status = failure.unwrap_or(STATUS_OK);

        let requests = self
            .method_key(method)
            .with("status", status)
            .with(NAME_SEGMENT, REQUESTS);
        if let Ok(event) = MetricEvent::counter(requests, 1_i64) {
            let _ = self.ingress.submit(event);
        }

        let latency = self.method_key(method).with(NAME_SEGMENT, LATENCY);
        let _ = self
            .ingress
            .submit(MetricEvent::elapsed(latency, start.elapsed()));

        if let Some(code) = failure {
            let errors = self
                .method_key(method)
                .with("status", code)
                .with(NAME_SEGMENT, ERRORS);
            if let Ok(event) = MetricEvent::counter(errors, 1_i64) {
                let _ = self.ingress.submit(event);
            }
        }
    }
}

/// Records one call when dropped.
#[must_use = "the call is recorded when the timer is dropped"]
pub struct CallTimer {
    instrument: CallInstrument,
    method: String,
    start: Instant,
    failure: Option<String>,
}

impl CallTimer {
    /// Mark the call as failed with a status code such as `"timeout"`.
    pub fn fail(&mut self, code: impl Into<String>) {
        self.failure = Some(code.into());
    }

    /// Method being timed.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        self.instrument
            .finish(&self.method, self.start, self.failure.as_deref());
    }
}

/// Open connection. Dropping it publishes the decremented gauge.
pub struct ConnectionGuard {
    instrument: CallInstrument,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.instrument.active.fetch_sub(1, Ordering::Relaxed) - 1;
        self.instrument.publish_active(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MetricValue;
    use crate::observer::{AggregateObserver, Observer};
    use crate::subject;
    use tokio_util::sync::CancellationToken;

    fn base() -> MetricKey {
        MetricKey::from_pairs([("service", "billing"), ("host", "h1")])
    }

    fn key(pairs: &[(&str, &str)]) -> MetricKey {
        let mut key = base();
        for (n, v) in pairs {
            key.push(*n, *v);
        }
        key
    }

    #[tokio::test]
    async fn timer_records_requests_latency_and_errors() {
        let agg = Arc::new(AggregateObserver::default());
        let (ingress, handle) = subject::spawn(
            CancellationToken::new(),
            vec![agg.clone() as Arc<dyn Observer>],
        );
        let instrument = CallInstrument::new(ingress, base());

        drop(instrument.begin("Get"));
        {
            let mut timer = instrument.begin("Get");
            timer.fail("timeout");
        }
        instrument.record_bytes("Get", 128, 0);
        drop(instrument);
        handle.await.unwrap();

        let snap = agg.report();
        let ok = key(&[("method", "Get"), ("status", "ok"), (NAME_SEGMENT, REQUESTS)]);
        let failed = key(&[("method", "Get"), ("status", "timeout"), (NAME_SEGMENT, REQUESTS)]);
        let errors = key(&[("method", "Get"), ("status", "timeout"), (NAME_SEGMENT, ERRORS)]);
        let latency = key(&[("method", "Get"), (NAME_SEGMENT, LATENCY)]);
        let received = key(&[("method", "Get"), (NAME_SEGMENT, BYTES_RECEIVED)]);
        let sent = key(&[("method", "Get"), (NAME_SEGMENT, BYTES_SENT)]);

        assert_eq!(snap.counter(&ok), Some(MetricValue::Int(1)));
        assert_eq!(snap.counter(&failed), Some(MetricValue::Int(1)));
        assert_eq!(snap.counter(&errors), Some(MetricValue::Int(1)));
        assert_eq!(snap.timing(&latency).map(|t| t.count), Some(2));
        assert_eq!(snap.counter(&received), Some(MetricValue::Int(128)));
        assert_eq!(snap.counter(&sent), None);
    }

    #[tokio::test]
    async fn connection_guard_tracks_active_count() {
        let agg = Arc::new(AggregateObserver::default());
        let (ingress, handle) = subject::spawn(
            CancellationToken::new(),
            vec![agg.clone() as Arc<dyn Observer>],
        );
        let instrument = CallInstrument::new(ingress, base());

        let first = instrument.connection_opened();
        let second = instrument.connection_opened();
        assert_eq!(instrument.active_connections(), 2);
        drop(first);
        assert_eq!(instrument.active_connections(), 1);
        drop(second);
        drop(instrument);
        handle.await.unwrap();

        let snap = agg.report();
        assert_eq!(snap.counter(&key(&[(NAME_SEGMENT, CONNECTIONS)])), Some(MetricValue::Int(2)));
        assert_eq!(snap.gauge(&key(&[(NAME_SEGMENT, ACTIVE_CONNECTIONS)])), Some(0.0));
    }
}
