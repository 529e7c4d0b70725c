//! Prometheus backend.
//!
//! Metric families are created lazily the first time a name is seen. The
//! family's label names are fixed by that first event; later events for the
//! same name with a different label set are rejected, which the relay logs
//! and drops.
//!
//! ## Naming
//!
//! - counters: `<namespace>_<name>_total`
//! - gauges: `<namespace>_<name>`
//! - timings: `<namespace>_<name>_seconds` histogram
//!
//! where `<name>` is the key's name segment with every character outside
//! `[a-zA-Z0-9_]` replaced by `_`.

use dashmap::DashMap;
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use super::{MetricsSink, flat_name, label_pairs};
use crate::error::SinkError;
use crate::key::{MetricKey, Tag};

/// Latency buckets in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
];

enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

struct Entry {
    family: Family,
    labels: Vec<String>,
}

struct Inner {
    registry: Registry,
    namespace: Option<String>,
    buckets: Vec<f64>,
    families: DashMap<String, Entry>,
}

/// [`MetricsSink`] backed by a private [`prometheus::Registry`].
#[derive(Clone)]
pub struct PrometheusSink {
    inner: Arc<Inner>,
}

impl PrometheusSink {
    /// Sink with no namespace prefix.
    pub fn new() -> Self {
        Self::with_registry(Registry::new(), None)
    }

    /// Sink prefixing every family with `namespace`.
    pub fn with_namespace(namespace: &str) -> Self {
        Self::with_registry(Registry::new(), Some(sanitize_name(namespace)))
    }

    /// Sink registering into an existing registry.
    pub fn with_registry(registry: Registry, namespace: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                namespace,
                buckets: DEFAULT_BUCKETS.to_vec(),
                families: DashMap::new(),
            }),
        }
    }

    /// The registry families are registered into.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode every family in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return String::new();
        }
        match String::from_utf8(buffer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
                String::new()
            }
        }
    }

    fn family_name(&self, key: &MetricKey, suffix: &str) -> String {
        let base = sanitize_name(&flat_name(key, '_'));
        let mut name = match &self.inner.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}_{base}"),
            _ => base,
        };
        if !suffix.is_empty() && !name.ends_with(suffix) {
            name.push_str(suffix);
        }
        name
    }

    /// Resolve the family for `name`, creating and registering it on first
    /// use, then run `f` with the label values in family order.
    fn with_family<F>(
        &self,
        name: String,
        key: &MetricKey,
        tags: &[Tag],
        create: impl FnOnce(&str, &[&str]) -> prometheus::Result<Family>,
        f: F,
    ) -> Result<(), SinkError>
    where
        F: FnOnce(&Family, &[&str]) -> prometheus::Result<()>,
    {
        let mut pairs: Vec<(String, &str)> = label_pairs(key, tags)
            .into_iter()
            .map(|(n, v)| (sanitize_label(n), v))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);

        let label_names: Vec<String> = pairs.iter().map(|(n, _)| n.clone()).collect();
        let values: Vec<&str> = pairs.iter().map(|(_, v)| *v).collect();

        let rejected = |reason: String| SinkError::Rejected {
            name: name.clone(),
            reason,
        };

        let entry = self
            .inner
            .families
            .entry(name.clone())
            .or_try_insert_with(|| {
                let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
                let family = create(&name, &names)?;
                let collector: Box<dyn prometheus::core::Collector> = match &family {
                    Family::Counter(c) => Box::new(c.clone()),
                    Family::Gauge(g) => Box::new(g.clone()),
                    Family::Histogram(h) => Box::new(h.clone()),
                };
                self.inner.registry.register(collector)?;
                Ok::<_, prometheus::Error>(Entry {
                    family,
                    labels: label_names.clone(),
                })
            })
            .map_err(|e| rejected(e.to_string()))?;

        if entry.labels != label_names {
            return Err(rejected(format!(
                "label set {:?} does not match registered {:?}",
                label_names, entry.labels
            )));
        }

        f(&entry.family, &values).map_err(|e| rejected(e.to_string()))
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_mismatch(expected: &str) -> prometheus::Error {
    prometheus::Error::Msg(format!("family already registered with a different type, expected {expected}"))
}

impl MetricsSink for PrometheusSink {
    fn incr_counter(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError> {
        let name = self.family_name(key, "_total");
        if value < 0.0 {
            return Err(SinkError::Rejected {
                name,
                reason: format!("negative counter increment {value}"),
            });
        }
        self.with_family(
            name,
            key,
            tags,
            |name, labels| Ok(Family::Counter(CounterVec::new(Opts::new(name, name), labels)?)),
            |family, values| match family {
                Family::Counter(vec) => {
                    vec.get_metric_with_label_values(values)?.inc_by(value);
                    Ok(())
                }
                _ => Err(kind_mismatch("counter")),
            },
        )
    }

    fn set_gauge(&self, key: &MetricKey, value: f64, tags: &[Tag]) -> Result<(), SinkError> {
        let name = self.family_name(key, "");
        self.with_family(
            name,
            key,
            tags,
            |name, labels| Ok(Family::Gauge(GaugeVec::new(Opts::new(name, name), labels)?)),
            |family, values| match family {
                Family::Gauge(vec) => {
                    vec.get_metric_with_label_values(values)?.set(value);
                    Ok(())
                }
                _ => Err(kind_mismatch("gauge")),
            },
        )
    }

    fn add_sample(&self, key: &MetricKey, seconds: f64, tags: &[Tag]) -> Result<(), SinkError> {
        let name = self.family_name(key, "_seconds");
        let buckets = self.inner.buckets.clone();
        self.with_family(
            name,
            key,
            tags,
            |name, labels| {
                Ok(Family::Histogram(HistogramVec::new(
                    HistogramOpts::new(name, name).buckets(buckets),
                    labels,
                )?))
            },
            |family, values| match family {
                Family::Histogram(vec) => {
                    vec.get_metric_with_label_values(values)?.observe(seconds);
                    Ok(())
                }
                _ => Err(kind_mismatch("histogram")),
            },
        )
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}

/// Replace characters Prometheus does not allow in metric names.
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Replace characters Prometheus does not allow in label names.
pub fn sanitize_label(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if out.starts_with("__") {
        out.replace_range(..2, "l_");
    }
    out
}
