//! Pull-style aggregator backing the dashboard.
//!
//! Keeps one aggregate per `(key, kind)` plus a ring of the most recent
//! events. [`AggregateObserver::report`] copies the state out under the lock
//! and derives quantiles after releasing it, so a dashboard request never
//! holds up ingestion for longer than a map clone.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};

use super::Observer;
use crate::event::{MetricEvent, MetricKind, MetricValue};
use crate::key::MetricKey;

/// Default number of recent events kept for the dashboard.
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Default number of timing samples kept per key for quantiles.
pub const DEFAULT_RESERVOIR_SIZE: usize = 256;

/// Default cap on distinct members tracked per set key.
pub const DEFAULT_SET_LIMIT: usize = 1024;

/// Sizing knobs for [`AggregateObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Recent-event ring size. Zero disables the ring.
    pub cache_size: usize,
    /// Timing reservoir size per key (minimum 1).
    pub reservoir_size: usize,
    /// Distinct members kept per set key.
    pub set_limit: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            set_limit: DEFAULT_SET_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
struct TimingCell {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    recent: VecDeque<f64>,
}

impl TimingCell {
    fn new(capacity: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            recent: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    fn record(&mut self, sample: f64, capacity: usize) {
        self.count += 1;
        self.sum += sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        if self.recent.len() == capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Counter(MetricValue),
    Gauge {
        value: f64,
        updated_at: DateTime<Utc>,
    },
    Timing(TimingCell),
    Set {
        members: BTreeSet<String>,
        overflowed: u64,
    },
}

impl Cell {
    fn empty(kind: MetricKind, config: &AggregateConfig) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(MetricValue::Int(0)),
            MetricKind::Gauge => Self::Gauge {
                value: 0.0,
                updated_at: DateTime::<Utc>::MIN_UTC,
            },
            MetricKind::Timing => Self::Timing(TimingCell::new(config.reservoir_size)),
            MetricKind::Set => Self::Set {
                members: BTreeSet::new(),
                overflowed: 0,
            },
        }
    }

    fn apply(&mut self, event: &MetricEvent, config: &AggregateConfig) {
        match self {
            Self::Counter(total) => *total = total.accumulate(event.value),
            Self::Gauge { value, updated_at } => {
                *value = event.value.as_f64();
                *updated_at = event.timestamp;
            }
            Self::Timing(cell) => cell.record(event.value.as_f64(), config.reservoir_size),
            Self::Set {
                members,
                overflowed,
            } => {
                let Some(member) = event.member.as_deref() else {
                    return;
                };
                if members.contains(member) {
                    return;
                }
                if members.len() < config.set_limit {
                    members.insert(member.to_string());
                } else {
                    *overflowed += 1;
                }
            }
        }
    }

    fn into_aggregate(self) -> Aggregate {
        match self {
            Self::Counter(total) => Aggregate::Counter { total },
            Self::Gauge { value, updated_at } => Aggregate::Gauge { value, updated_at },
            Self::Timing(cell) => Aggregate::Timing(TimingStats::from_cell(cell)),
            Self::Set {
                members,
                overflowed,
            } => Aggregate::Set {
                distinct: members.len(),
                members: members.into_iter().collect(),
                overflowed,
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    cells: HashMap<(MetricKey, MetricKind), Cell>,
    recent: VecDeque<MetricEvent>,
    observed: u64,
}

/// Summary of the timing samples seen for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    /// Samples seen since startup.
    pub count: u64,
    /// Sum of all samples, in seconds.
    pub sum: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// `sum / count`.
    pub mean: f64,
    /// Median over the recent reservoir.
    pub p50: f64,
    /// 90th percentile over the recent reservoir.
    pub p90: f64,
    /// 99th percentile over the recent reservoir.
    pub p99: f64,
}

impl TimingStats {
    fn from_cell(cell: TimingCell) -> Self {
        let mut sorted: Vec<f64> = cell.recent.into_iter().collect();
        sorted.sort_by(f64::total_cmp);
        let mean = if cell.count == 0 {
            0.0
        } else {
            cell.sum / cell.count as f64
        };
        Self {
            count: cell.count,
            sum: cell.sum,
            min: if cell.count == 0 { 0.0 } else { cell.min },
            max: if cell.count == 0 { 0.0 } else { cell.max },
            mean,
            p50: quantile(&sorted, 0.50),
            p90: quantile(&sorted, 0.90),
            p99: quantile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank quantile over an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Aggregated state for one `(key, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregate {
    /// Running sum.
    Counter {
        /// Sum of all increments. Integral until a fractional increment
        /// arrives or the sum leaves the `i64` range.
        total: MetricValue,
    },
    /// Last delivered sample.
    Gauge {
        /// Latest value.
        value: f64,
        /// Capture time of the latest value.
        updated_at: DateTime<Utc>,
    },
    /// Timing summary.
    Timing(TimingStats),
    /// Distinct members.
    Set {
        /// Distinct members tracked.
        distinct: usize,
        /// Tracked members in sorted order.
        members: Vec<String>,
        /// New members ignored after the limit was reached.
        overflowed: u64,
    },
}

/// One row of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// Identity key.
    pub key: MetricKey,
    /// Aggregate kind.
    pub kind: MetricKind,
    /// Aggregated value.
    pub aggregate: Aggregate,
}

/// Immutable copy of the aggregator state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// When the copy was taken.
    pub taken_at: DateTime<Utc>,
    /// Events observed since startup.
    pub observed: u64,
    /// Aggregates ordered by joined key, then kind.
    pub metrics: Vec<MetricSnapshot>,
    /// Most recent events, oldest first.
    pub recent: Vec<MetricEvent>,
}

impl Snapshot {
    /// Aggregate for `(key, kind)`.
    pub fn get(&self, key: &MetricKey, kind: MetricKind) -> Option<&Aggregate> {
        self.metrics
            .iter()
            .find(|m| m.kind == kind && &m.key == key)
            .map(|m| &m.aggregate)
    }

    /// Counter total for `key`.
    pub fn counter(&self, key: &MetricKey) -> Option<MetricValue> {
        match self.get(key, MetricKind::Counter)? {
            Aggregate::Counter { total } => Some(*total),
            _ => None,
        }
    }

    /// Latest gauge value for `key`.
    pub fn gauge(&self, key: &MetricKey) -> Option<f64> {
        match self.get(key, MetricKind::Gauge)? {
            Aggregate::Gauge { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Timing summary for `key`.
    pub fn timing(&self, key: &MetricKey) -> Option<&TimingStats> {
        match self.get(key, MetricKind::Timing)? {
            Aggregate::Timing(stats) => Some(stats),
            _ => None,
        }
    }

    /// Distinct member count for `key`.
    pub fn set_size(&self, key: &MetricKey) -> Option<usize> {
        match self.get(key, MetricKind::Set)? {
            Aggregate::Set { distinct, .. } => Some(*distinct),
            _ => None,
        }
    }
}

/// Dashboard aggregator.
///
/// Per-member and per-sample state is bounded by [`AggregateConfig`], but the
/// key map is not: every distinct `(key, kind)` seen keeps one aggregate for
/// the life of the observer. Producers should keep tag values low-cardinality
/// (no request ids or user ids in keys).
pub struct AggregateObserver {
    config: AggregateConfig,
    state: Mutex<State>,
}

impl AggregateObserver {
    /// Aggregator keeping the last `cache_size` events.
    pub fn new(cache_size: usize) -> Self {
        Self::with_config(AggregateConfig {
            cache_size,
            ..AggregateConfig::default()
        })
    }

    /// Aggregator with explicit sizing.
    pub fn with_config(mut config: AggregateConfig) -> Self {
        config.reservoir_size = config.reservoir_size.max(1);
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Copy out the current state.
    pub fn report(&self) -> Snapshot {
        let (cells, recent, observed) = {
            let state = self.state.lock();
            (
                state.cells.clone(),
                state.recent.iter().cloned().collect::<Vec<_>>(),
                state.observed,
            )
        };

        let mut metrics: Vec<MetricSnapshot> = cells
            .into_iter()
            .map(|((key, kind), cell)| MetricSnapshot {
                key,
                kind,
                aggregate: cell.into_aggregate(),
            })
            .collect();
        metrics.sort_by_cached_key(|m| (m.key.join(), m.kind));

        Snapshot {
            taken_at: Utc::now(),
            observed,
            metrics,
            recent,
        }
    }

    /// Number of distinct aggregates.
    pub fn len(&self) -> usize {
        self.state.lock().cells.len()
    }

    /// `true` before the first event.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AggregateObserver {
    fn default() -> Self {
        Self::with_config(AggregateConfig::default())
    }
}

impl Observer for AggregateObserver {
    fn observe(&self, event: &MetricEvent) {
        let mut state = self.state.lock();
        state.observed += 1;

        let config = &self.config;
        state
            .cells
            .entry((event.key.clone(), event.kind))
            .or_insert_with(|| Cell::empty(event.kind, config))
            .apply(event, config);

        if config.cache_size > 0 {
            if state.recent.len() == config.cache_size {
                state.recent.pop_front();
            }
            state.recent.push_back(event.clone());
        }
    }

    fn name(&self) -> &'static str {
        "aggregate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> MetricKey {
        MetricKey::from_pairs([("service", service)])
    }

    #[test]
    fn counters_sum_across_interleaved_keys() {
        let obs = AggregateObserver::default();
        for i in 1..=10_i64 {
            obs.observe(&MetricEvent::counter(key("a"), i).unwrap());
            obs.observe(&MetricEvent::counter(key("b"), 100_i64).unwrap());
        }
        let snap = obs.report();
        assert_eq!(snap.counter(&key("a")), Some(MetricValue::Int(55)));
        assert_eq!(snap.counter(&key("b")), Some(MetricValue::Int(1000)));
    }

    #[test]
    fn integer_counters_stay_exact_past_f64_precision() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("big"), 1_i64 << 53).unwrap());
        obs.observe(&MetricEvent::counter(key("big"), 1_i64).unwrap());
        assert_eq!(
            obs.report().counter(&key("big")),
            Some(MetricValue::Int((1_i64 << 53) + 1))
        );
    }

    #[test]
    fn fractional_increment_switches_counter_to_float() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("mixed"), 2_i64).unwrap());
        obs.observe(&MetricEvent::counter(key("mixed"), 0.5).unwrap());
        obs.observe(&MetricEvent::counter(key("mixed"), 1_i64).unwrap());
        assert_eq!(obs.report().counter(&key("mixed")), Some(MetricValue::Float(3.5)));
    }

    #[test]
    fn counter_overflow_falls_back_to_float() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("o"), i64::MAX).unwrap());
        obs.observe(&MetricEvent::counter(key("o"), i64::MAX).unwrap());
        match obs.report().counter(&key("o")) {
            Some(MetricValue::Float(total)) => assert_eq!(total, 2.0 * i64::MAX as f64),
            other => panic!("unexpected total: {other:?}"),
        }
    }

    #[test]
    fn gauge_keeps_last_delivered() {
        let obs = AggregateObserver::default();
        for v in [3.0, 9.5, -1.25] {
            obs.observe(&MetricEvent::gauge(key("g"), v).unwrap());
        }
        assert_eq!(obs.report().gauge(&key("g")), Some(-1.25));
    }

    #[test]
    fn same_key_different_kind_is_separate() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("x"), 2_i64).unwrap());
        obs.observe(&MetricEvent::gauge(key("x"), 7_i64).unwrap());
        let snap = obs.report();
        assert_eq!(snap.counter(&key("x")), Some(MetricValue::Int(2)));
        assert_eq!(snap.gauge(&key("x")), Some(7.0));
        assert_eq!(obs.len(), 2);
    }

    #[test]
    fn timing_summary_and_quantiles() {
        let obs = AggregateObserver::default();
        for ms in 1..=100 {
            obs.observe(&MetricEvent::timing(key("t"), f64::from(ms) / 1000.0).unwrap());
        }
        let snap = obs.report();
        let stats = snap.timing(&key("t")).unwrap();
        assert_eq!(stats.count, 100);
        assert!((stats.min - 0.001).abs() < 1e-12);
        assert!((stats.max - 0.1).abs() < 1e-12);
        assert!((stats.p50 - 0.05).abs() < 1e-12);
        assert!((stats.p99 - 0.099).abs() < 1e-12);
    }

    #[test]
    fn reservoir_is_bounded_but_totals_are_not() {
        let obs = AggregateObserver::with_config(AggregateConfig {
            reservoir_size: 4,
            ..AggregateConfig::default()
        });
        for v in [10.0, 10.0, 10.0, 10.0, 1.0, 1.0, 1.0, 1.0] {
            obs.observe(&MetricEvent::timing(key("t"), v).unwrap());
        }
        let snap = obs.report();
        let stats = snap.timing(&key("t")).unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.p99, 1.0);
    }

    #[test]
    fn set_counts_distinct_members_up_to_limit() {
        let obs = AggregateObserver::with_config(AggregateConfig {
            set_limit: 2,
            ..AggregateConfig::default()
        });
        for m in ["a", "b", "a", "c"] {
            obs.observe(&MetricEvent::set_sample(key("s"), m));
        }
        let snap = obs.report();
        assert_eq!(snap.set_size(&key("s")), Some(2));
        match snap.get(&key("s"), MetricKind::Set) {
            Some(Aggregate::Set { overflowed, .. }) => assert_eq!(*overflowed, 1),
            other => panic!("unexpected aggregate: {other:?}"),
        }
    }

    #[test]
    fn recent_ring_keeps_last_n() {
        let obs = AggregateObserver::new(3);
        for i in 0..5_i64 {
            obs.observe(&MetricEvent::counter(key("r"), i).unwrap());
        }
        let snap = obs.report();
        let values: Vec<f64> = snap.recent.iter().map(|e| e.value.as_f64()).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(snap.observed, 5);
    }

    #[test]
    fn snapshot_is_detached_from_live_state() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("d"), 1_i64).unwrap());
        let before = obs.report();
        obs.observe(&MetricEvent::counter(key("d"), 1_i64).unwrap());
        assert_eq!(before.counter(&key("d")), Some(MetricValue::Int(1)));
        assert_eq!(obs.report().counter(&key("d")), Some(MetricValue::Int(2)));
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::timing(key("j"), 0.5).unwrap());
        let json = serde_json::to_value(obs.report()).unwrap();
        assert_eq!(json["metrics"][0]["key"], "service/j");
        assert_eq!(json["metrics"][0]["aggregate"]["type"], "timing");
        assert_eq!(json["metrics"][0]["aggregate"]["count"], 1);
    }

    #[test]
    fn integer_counter_serializes_as_json_integer() {
        let obs = AggregateObserver::default();
        obs.observe(&MetricEvent::counter(key("n"), 1_i64 << 53).unwrap());
        obs.observe(&MetricEvent::counter(key("n"), 1_i64).unwrap());
        let json = serde_json::to_value(obs.report()).unwrap();
        assert_eq!(json["metrics"][0]["aggregate"]["total"].as_i64(), Some((1 << 53) + 1));
    }

    #[test]
    fn quantile_edges() {
        assert_eq!(quantile(&[], 0.5), 0.0);
        assert_eq!(quantile(&[4.0], 0.0), 4.0);
        assert_eq!(quantile(&[1.0, 2.0], 1.0), 2.0);
    }
}
