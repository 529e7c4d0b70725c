//! Consumers of the bus fan-out.
//!
//! Every consumer implements the single [`Observer`] capability. The bus
//! calls [`Observer::observe`] inline on its dispatch task, so
//! implementations must do O(1) work per event: update a map, push into a
//! bounded queue. Anything that performs I/O hands off to its own task
//! (see [`relay::RelayObserver`]).

pub mod aggregate;
pub mod relay;

use std::sync::Arc;

use crate::event::MetricEvent;

pub use aggregate::{AggregateObserver, Snapshot};
pub use relay::{RelayConfig, RelayObserver, RelayStats};

/// A pluggable consumer of metric events.
pub trait Observer: Send + Sync {
    /// Consume one event. Must not block.
    fn observe(&self, event: &MetricEvent);

    /// Called once by the dispatch loop after the final event was delivered.
    fn close(&self) {}

    /// Short name used in log fields.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T: Observer + ?Sized> Observer for Arc<T> {
    fn observe(&self, event: &MetricEvent) {
        (**self).observe(event);
    }

    fn close(&self) {
        (**self).close();
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
