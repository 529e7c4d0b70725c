//! Error types for the metrics subsystem.
//!
//! Producer-side failures ([`MetricError`]) are resolved at the call site and
//! never enter the bus. Consumer-side failures ([`SinkError`]) stay inside the
//! relay that hit them. Queue saturation is not an error at all: it is a
//! [`DropReason`] that only shows up in counters.

use thiserror::Error;

/// Convenience type alias for Results using [`MetricError`].
pub type Result<T, E = MetricError> = std::result::Result<T, E>;

/// Errors raised while constructing a metric event.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum MetricError {
    /// The numeric payload cannot be aggregated (NaN, infinite, or a
    /// negative duration for timings).
    #[error("invalid metric value for {kind}: {value}")]
    InvalidMetricValue {
        /// Kind of the rejected event.
        kind: &'static str,
        /// The offending value.
        value: f64,
    },

    /// A joined key string could not be parsed back into tag pairs.
    #[error("malformed metric key: {0}")]
    MalformedKey(String),
}

impl MetricError {
    pub(crate) fn invalid(kind: &'static str, value: f64) -> Self {
        Self::InvalidMetricValue { kind, value }
    }
}

/// Failure to push an event to an external metrics backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The backend could not be reached.
    #[error("sink unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    /// The backend rejected the metric (bad name, label mismatch, ...).
    #[error("sink rejected metric {name}: {reason}")]
    Rejected {
        /// Flattened metric name.
        name: String,
        /// Backend-provided reason.
        reason: String,
    },
}

impl SinkError {
    /// Static label for log fields and counters.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "sink_unavailable",
            Self::Rejected { .. } => "sink_rejected",
        }
    }
}

/// Why an event was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The bounded queue was full at hand-off time.
    Saturated,
    /// The bus (or relay) has shut down.
    Closed,
}

impl DropReason {
    /// Static label for log fields.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saturated => "queue_saturated",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_message_names_kind() {
        let err = MetricError::invalid("counter", f64::NAN);
        assert!(err.to_string().contains("counter"));
    }

    #[test]
    fn sink_error_codes() {
        let io = SinkError::from(std::io::Error::other("refused"));
        assert_eq!(io.error_code(), "sink_unavailable");
        let rejected = SinkError::Rejected {
            name: "x".into(),
            reason: "bad".into(),
        };
        assert_eq!(rejected.error_code(), "sink_rejected");
    }
}
