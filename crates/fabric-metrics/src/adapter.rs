//! Generic stats API and its bus-backed implementation.
//!
//! Code written against [`StatsApi`] does not know the bus exists.
//! [`BusSink`] turns each call into a [`MetricEvent`] with a key built by the
//! same [`MetricKey`] rules native producers use, so both paths aggregate
//! into the same entries.

use std::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::event::MetricEvent;
use crate::key::{MetricKey, NAME_SEGMENT, Tag};
use crate::subject::Ingress;

/// Backend-agnostic stats emission.
///
/// Keys are dotted paths given as parts (`&["rpc", "requests"]`). Every
/// method is fire-and-forget: invalid values are discarded at the call site.
pub trait StatsApi: Send + Sync {
    /// Increment a counter with extra labels.
    fn incr_counter_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]);

    /// Set a gauge with extra labels.
    fn set_gauge_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]);

    /// Record a sample (seconds for durations) with extra labels.
    fn add_sample_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]);

    /// Record membership of `member` in a set.
    fn add_set_member(&self, key: &[&str], member: &str);

    /// Increment a counter.
    fn incr_counter(&self, key: &[&str], value: f64) {
        self.incr_counter_with_labels(key, value, &[]);
    }

    /// Set a gauge.
    fn set_gauge(&self, key: &[&str], value: f64) {
        self.set_gauge_with_labels(key, value, &[]);
    }

    /// Record a sample.
    fn add_sample(&self, key: &[&str], value: f64) {
        self.add_sample_with_labels(key, value, &[]);
    }

    /// Record the seconds elapsed since `start`.
    fn measure_since(&self, key: &[&str], start: Instant) {
        self.add_sample(key, start.elapsed().as_secs_f64());
    }
}

/// [`StatsApi`] that feeds the bus.
#[derive(Debug, Clone)]
pub struct BusSink {
    ingress: Ingress,
    base: MetricKey,
    labels: Vec<Tag>,
}

impl BusSink {
    /// Adapter with no base tags.
    pub fn new(ingress: Ingress) -> Self {
        Self {
            ingress,
            base: MetricKey::new(),
            labels: Vec::new(),
        }
    }

    /// Prepend an identity segment (e.g. `service`) to every key.
    pub fn with_base_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.base.push(name, value);
        self
    }

    /// Attach an auxiliary label to every event.
    pub fn with_label(mut self, label: Tag) -> Self {
        self.labels.push(label);
        self
    }

    /// Key the adapter builds for `parts`.
    pub fn key_for(&self, parts: &[&str]) -> MetricKey {
        self.base.clone().with(NAME_SEGMENT, parts.join("."))
    }

    fn emit(&self, event: Result<MetricEvent>, labels: &[Tag]) {
        match event {
            Ok(event) => {
                let tags = self.labels.iter().chain(labels).cloned();
                let _ = self.ingress.submit(event.with_tags(tags));
            }
            Err(e) => debug!(error = %e, "discarding invalid stats call"),
        }
    }
}

impl StatsApi for BusSink {
    fn incr_counter_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]) {
        self.emit(MetricEvent::counter(self.key_for(key), value), labels);
    }

    fn set_gauge_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]) {
        self.emit(MetricEvent::gauge(self.key_for(key), value), labels);
    }

    fn add_sample_with_labels(&self, key: &[&str], value: f64, labels: &[Tag]) {
        self.emit(MetricEvent::timing(self.key_for(key), value), labels);
    }

    fn add_set_member(&self, key: &[&str], member: &str) {
        self.emit(Ok(MetricEvent::set_sample(self.key_for(key), member)), &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{MetricKind, MetricValue};
    use crate::observer::{AggregateObserver, Observer};
    use crate::subject;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn key_matches_native_construction() {
        let (ingress, _handle) = subject::spawn(CancellationToken::new(), Vec::new());

        let sink = BusSink::new(ingress).with_base_tag("service", "x");
        let native = MetricKey::from_pairs([("service", "x"), (NAME_SEGMENT, "rpc.requests")]);
        assert_eq!(sink.key_for(&["rpc", "requests"]).join(), native.join());
    }

    #[tokio::test]
    async fn calls_reach_the_aggregator() {
        let token = CancellationToken::new();
        let agg = Arc::new(AggregateObserver::default());
        let (ingress, handle) = subject::spawn(token, vec![agg.clone() as Arc<dyn Observer>]);

        let sink = BusSink::new(ingress.clone())
            .with_base_tag("service", "x")
            .with_label(Tag::new("region", "eu"));
        sink.incr_counter(&["hits"], 2.0);
        sink.incr_counter(&["hits"], 3.0);
        sink.set_gauge(&["queue", "depth"], 12.0);
        sink.add_sample(&["latency"], 0.25);
        sink.add_set_member(&["users"], "u1");
        sink.add_sample(&["latency"], -1.0);
        sink.incr_counter(&["hits"], f64::NAN);
        drop(sink);
        drop(ingress);
        handle.await.unwrap();

        let snap = agg.report();
        let k = |name: &str| MetricKey::from_pairs([("service", "x"), (NAME_SEGMENT, name)]);
        assert_eq!(snap.counter(&k("hits")), Some(MetricValue::Float(5.0)));
        assert_eq!(snap.gauge(&k("queue.depth")), Some(12.0));
        assert_eq!(snap.timing(&k("latency")).map(|t| t.count), Some(1));
        assert_eq!(snap.set_size(&k("users")), Some(1));
        assert!(snap.get(&k("hits"), MetricKind::Timing).is_none());
        assert!(
            snap.recent
                .iter()
                .all(|e| e.tags.contains(&Tag::new("region", "eu")))
        );
    }
}
