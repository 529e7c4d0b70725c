//! The unit of data flowing through the bus.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::{MetricError, Result};
use crate::key::{MetricKey, Tag};

/// What an event means to the aggregate it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic increment; aggregates by sum.
    Counter,
    /// Point-in-time sample; last write wins.
    Gauge,
    /// Duration sample in seconds; aggregates into a summary.
    Timing,
    /// Membership sample; aggregates into a distinct set.
    Set,
}

impl MetricKind {
    /// Static label for logs and exporters.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timing => "timing",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric payload of an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Integral value.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

impl MetricValue {
    /// Value widened to `f64`.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Running-sum step: exact while both sides are integral and the sum
    /// fits in `i64`, `f64` from then on.
    #[inline]
    pub fn accumulate(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(b)
                .map_or(Self::Float(a as f64 + b as f64), Self::Int),
            (a, b) => Self::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn is_finite(&self) -> bool {
        match *self {
            Self::Int(_) => true,
            Self::Float(v) => v.is_finite(),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Int)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

/// A single metric observation.
///
/// Identity is `key` + `kind`; `tags` are auxiliary labels that observers may
/// use for dimensioning but never for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    /// Identity key.
    pub key: MetricKey,
    /// Event kind.
    pub kind: MetricKind,
    /// Numeric payload. For [`MetricKind::Set`] this is always `1`.
    pub value: MetricValue,
    /// Set member, only present for [`MetricKind::Set`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Capture time assigned at construction.
    pub timestamp: DateTime<Utc>,
    /// Auxiliary labels.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl MetricEvent {
    fn build(key: MetricKey, kind: MetricKind, value: MetricValue) -> Self {
        Self {
            key,
            kind,
            value,
            member: None,
            timestamp: Utc::now(),
            tags: Vec::new(),
        }
    }

    /// A counter increment. Rejects NaN and infinite values.
    pub fn counter(key: MetricKey, value: impl Into<MetricValue>) -> Result<Self> {
        let value = value.into();
        if !value.is_finite() {
            return Err(MetricError::invalid(MetricKind::Counter.as_str(), value.as_f64()));
        }
        Ok(Self::build(key, MetricKind::Counter, value))
    }

    /// A gauge sample. Rejects NaN and infinite values.
    pub fn gauge(key: MetricKey, value: impl Into<MetricValue>) -> Result<Self> {
        let value = value.into();
        if !value.is_finite() {
            return Err(MetricError::invalid(MetricKind::Gauge.as_str(), value.as_f64()));
        }
        Ok(Self::build(key, MetricKind::Gauge, value))
    }

    /// A timing sample in seconds. Rejects NaN, infinite and negative values.
    pub fn timing(key: MetricKey, seconds: f64) -> Result<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(MetricError::invalid(MetricKind::Timing.as_str(), seconds));
        }
        Ok(Self::build(key, MetricKind::Timing, MetricValue::Float(seconds)))
    }

    /// A timing sample from a measured [`Duration`]; cannot fail.
    pub fn elapsed(key: MetricKey, duration: Duration) -> Self {
        Self::build(
            key,
            MetricKind::Timing,
            MetricValue::Float(duration.as_secs_f64()),
        )
    }

    /// A set-membership sample.
    pub fn set_sample(key: MetricKey, member: impl Into<String>) -> Self {
        let mut event = Self::build(key, MetricKind::Set, MetricValue::Int(1));
        event.member = Some(member.into());
        event
    }

    /// Attach auxiliary labels.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Override the capture time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether two events update the same aggregate.
    #[inline]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}
