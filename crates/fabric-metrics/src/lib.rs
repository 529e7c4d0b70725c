//! # fabric-metrics
//!
//! In-process metrics bus for long-running services.
//!
//! Producers (transport instrumentation, the runtime sampler, code written
//! against [`StatsApi`]) submit [`MetricEvent`]s through a cloneable
//! [`Ingress`]. Submission never blocks: the event goes into a bounded
//! queue or is dropped and counted. A single dispatch task fans each event
//! out to a fixed list of [`Observer`]s:
//!
//! - [`AggregateObserver`] keeps per-key aggregates and the most recent
//!   events for the dashboard,
//! - [`RelayObserver`] forwards events to an external backend
//!   ([`sink::prometheus::PrometheusSink`], [`sink::statsd::StatsdSink`]).
//!
//! ```no_run
//! use std::sync::Arc;
//! use fabric_metrics::{AggregateObserver, MetricEvent, MetricKey, Observer, Subject};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), fabric_metrics::MetricError> {
//! let token = CancellationToken::new();
//! let aggregate = Arc::new(AggregateObserver::default());
//! let (ingress, bus) = Subject::new(token.clone(), vec![aggregate.clone() as Arc<dyn Observer>])
//!     .with_capacity(1024)
//!     .spawn();
//!
//! let key = MetricKey::from_pairs([("service", "billing"), ("name", "rpc.requests")]);
//! let _ = ingress.submit(MetricEvent::counter(key, 1_i64)?);
//!
//! token.cancel();
//! let _ = bus.await;
//! println!("{}", aggregate.report().observed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod error;
pub mod event;
pub mod key;
pub mod observer;
pub mod runtime;
pub mod sink;
pub mod subject;
pub mod transport;

pub use adapter::{BusSink, StatsApi};
pub use error::{DropReason, MetricError, Result, SinkError};
pub use event::{MetricEvent, MetricKind, MetricValue};
pub use key::{MetricKey, NAME_SEGMENT, Tag, split_key};
pub use observer::{AggregateObserver, Observer, RelayConfig, RelayObserver, RelayStats, Snapshot};
pub use runtime::{RuntimeSample, spawn_runtime_sampler};
pub use sink::MetricsSink;
pub use subject::{DispatchStats, Ingress, IngressStats, Subject, Submitted};
pub use transport::{CallInstrument, CallTimer, ConnectionGuard};
