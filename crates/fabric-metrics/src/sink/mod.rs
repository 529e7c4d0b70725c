//! External metrics backends driven by [`RelayObserver`](crate::observer::RelayObserver).

#[cfg(feature = "prometheus")]
pub mod prometheus;
#[cfg(feature = "statsd")]
pub mod statsd;

use std::sync::Arc;

use crate::error::SinkError;
use crate::event::{MetricEvent, MetricKind};
use crate::key::{MetricKey, NAME_SEGMENT, Tag};
use crate::runtime::RuntimeSample;

/// Name prefix of the gauges a relay pushes on each flush tick.
pub const RUNTIME_PREFIX: &str = "process.";

/// Push-style client of an external metrics backend.
///
/// Called only from a relay's background task, never from the bus dispatch
/// loop, so implementations may do blocking-ish work such as a UDP send.
pub trait MetricsSink: Send + Sync + 'static {
    /// Add `value` to a counter.
    fn incr_counter(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError>;

    /// Set a gauge.
    fn set_gauge(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError>;

    /// Record a timing sample in seconds.
    fn add_sample(&self, key: &MetricKey, seconds: f64, tags: &[Tag]) -> Result<(), SinkError>;

    /// Record set membership. Backends without sets ignore it.
    fn add_set_member(&self, _key: &MetricKey, _member: &str, _tags: &[Tag]) -> Result<(), SinkError> {
        Ok(())
    }

    /// Push a bulk runtime sample, one gauge per available field, named
    /// `process.<field>` so it never shares a family with the tagged
    /// `runtime.*` gauges the sampler sends through the bus.
    fn push_runtime(&self, sample: &RuntimeSample) -> Result<(), SinkError> {
        for (name, value) in sample.gauges() {
            let field = name.strip_prefix("runtime.").unwrap_or(name);
            let key = MetricKey::new().with(NAME_SEGMENT, format!("{RUNTIME_PREFIX}{field}"));
            self.set_gauge(&key, value, &[])?;
        }
        Ok(())
    }

    /// Flush any client-side buffering.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Short name used in log fields.
    fn name(&self) -> &'static str;
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn incr_counter(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError> {
        (**self).incr_counter(key, value, tags)
    }

    fn set_gauge(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError> {
        (**self).set_gauge(key, value, tags)
    }

    fn add_sample(&self, key: &MetricKey, seconds: f64, tags: &[Tag]) -> Result<(), SinkError> {
        (**self).add_sample(key, seconds, tags)
    }

    fn add_set_member(&self, key: &MetricKey, member: &str, tags: &[Tag]) -> Result<(), SinkError> {
        (**self).add_set_member(key, member, tags)
    }

    fn push_runtime(&self, sample: &RuntimeSample) -> Result<(), SinkError> {
        (**self).push_runtime(sample)
    }

    fn flush(&self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Route one bus event to the matching sink call.
pub fn relay_event<S: MetricsSink + ?Sized>(sink: &S, event: &MetricEvent) -> Result<(), SinkError> {
    let value = event.value.as_f64();
    match event.kind {
        MetricKind::Counter => sink.incr_counter(&event.key, value, &event.tags),
        MetricKind::Gauge => sink.set_gauge(&event.key, value, &event.tags),
        MetricKind::Timing => sink.add_sample(&event.key, value, &event.tags),
        MetricKind::Set => match event.member.as_deref() {
            Some(member) => sink.add_set_member(&event.key, member, &event.tags),
            None => Ok(()),
        },
    }
}

/// Flat name for backends without structured keys: the name segment if the
/// key has one, otherwise every value joined with `sep`.
pub fn flat_name(key: &MetricKey, sep: char) -> String {
    if let Some(name) = key.metric_name() {
        return name.to_string();
    }
    let mut out = String::new();
    for (i, tag) in key.segments().iter().enumerate() {
        if i > 0 {
            out.push(sep);
        }
        out.push_str(&tag.value);
    }
    out
}

/// Key segments other than the name segment, followed by auxiliary tags.
pub fn label_pairs<'a>(key: &'a MetricKey, tags: &'a [Tag]) -> Vec<(&'a str, &'a str)> {
    key.segments()
        .iter()
        .filter(|t| t.name != NAME_SEGMENT)
        .chain(tags)
        .map(|t| (t.name.as_str(), t.value.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl MetricsSink for Calls {
        fn incr_counter(&self, key: &MetricKey, value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            self.0.lock().push(format!("c {key} {value}"));
            Ok(())
        }

        fn set_gauge(&self, key: &MetricKey, value: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            self.0.lock().push(format!("g {key} {value}"));
            Ok(())
        }

        fn add_sample(&self, key: &MetricKey, seconds: f64, _tags: &[Tag]) -> Result<(), SinkError> {
            self.0.lock().push(format!("t {key} {seconds}"));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "calls"
        }
    }

    #[test]
    fn relay_event_routes_by_kind() {
        let sink = Calls::default();
        let key = MetricKey::from_pairs([("service", "x")]);
        relay_event(&sink, &MetricEvent::counter(key.clone(), 2_i64).unwrap()).unwrap();
        relay_event(&sink, &MetricEvent::gauge(key.clone(), 1.5).unwrap()).unwrap();
        relay_event(&sink, &MetricEvent::timing(key.clone(), 0.5).unwrap()).unwrap();
        relay_event(&sink, &MetricEvent::set_sample(key, "m")).unwrap();
        assert_eq!(
            *sink.0.lock(),
            vec!["c service/x 2", "g service/x 1.5", "t service/x 0.5"]
        );
    }

    #[test]
    fn push_runtime_emits_one_gauge_per_field() {
        let sink = Calls::default();
        let sample = RuntimeSample {
            uptime_secs: 1.0,
            threads: Some(2),
            ..RuntimeSample::default()
        };
        sink.push_runtime(&sample).unwrap();
        assert_eq!(
            *sink.0.lock(),
            vec!["g name/process.uptime_seconds 1", "g name/process.threads 2"]
        );
    }

    #[test]
    fn flat_name_prefers_name_segment() {
        let named = MetricKey::from_pairs([("service", "x"), (NAME_SEGMENT, "rpc.requests")]);
        assert_eq!(flat_name(&named, '.'), "rpc.requests");
        let bare = MetricKey::from_pairs([("service", "x"), ("host", "h1")]);
        assert_eq!(flat_name(&bare, '.'), "x.h1");
    }

    #[test]
    fn label_pairs_skip_name_segment() {
        let key = MetricKey::from_pairs([("service", "x"), (NAME_SEGMENT, "hits")]);
        let tags = [Tag::new("region", "eu")];
        assert_eq!(
            label_pairs(&key, &tags),
            vec![("service", "x"), ("region", "eu")]
        );
    }
}
