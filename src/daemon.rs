//! Process wiring: startup order, signal handling and ordered shutdown.
//!
//! Startup binds both listeners before anything is spawned, so a bind
//! failure leaves nothing behind. Shutdown cancels the process token,
//! releases announcements in reverse order, then awaits every task with one
//! shared deadline.

use fabric_metrics::sink::prometheus::PrometheusSink;
use fabric_metrics::sink::statsd::StatsdSink;
use fabric_metrics::{
    AggregateObserver, BusSink, CallInstrument, DispatchStats, Ingress, MetricKey, Observer,
    RelayConfig, RelayObserver, RelayStats, StatsApi, Subject, runtime,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::announce::{self, Announcements, Announcer, HttpRegistry};
use crate::config::Config;
use crate::error::StartupError;
use crate::http::{self, HttpState};
use crate::network::Gateway;

/// Deadline for tasks to finish after cancellation.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A running daemon.
pub struct Daemon {
    token: CancellationToken,
    ingress: Ingress,
    aggregate: Arc<AggregateObserver>,
    metrics_addr: SocketAddr,
    transport_addr: SocketAddr,
    bus: JoinHandle<DispatchStats>,
    relays: Vec<(&'static str, JoinHandle<RelayStats>)>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    announcements: Announcements,
}

/// What shutdown observed.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub dispatch: Option<DispatchStats>,
    pub relays: Vec<(&'static str, RelayStats)>,
    /// Tasks that missed the deadline or panicked.
    pub unfinished: Vec<&'static str>,
    pub release_failures: usize,
}

impl Daemon {
    /// Start with the announcer the configuration asks for.
    pub async fn start(config: &Config, token: CancellationToken) -> Result<Self, StartupError> {
        let announcer: Option<Arc<dyn Announcer>> = match &config.discovery.registry_url {
            Some(url) if config.discovery.enabled => Some(Arc::new(HttpRegistry::new(
                url,
                config.discovery.timeout(),
            )?)),
            _ => None,
        };
        Self::start_with(config, token, announcer).await
    }

    /// Start with an explicit announcer (`None` skips discovery).
    pub async fn start_with(
        config: &Config,
        token: CancellationToken,
        announcer: Option<Arc<dyn Announcer>>,
    ) -> Result<Self, StartupError> {
        runtime::mark_process_start();
        let metrics = &config.metrics;
        let host = config.service.host_name();
        let base = MetricKey::from_pairs([
            ("service", config.service.name.as_str()),
            ("host", host.as_str()),
        ]);

        // Listeners first: nothing is running yet if either bind fails.
        let bind_failed = |what: &'static str, addr: SocketAddr| {
            move |source: std::io::Error| StartupError::Bind { what, addr, source }
        };
        let http_listener = http::bind(metrics.address)
            .await
            .map_err(bind_failed("metrics", metrics.address))?;
        let metrics_addr = http_listener
            .local_addr()
            .map_err(bind_failed("metrics", metrics.address))?;
        let gateway = Gateway::bind(config.transport.address)
            .await
            .map_err(bind_failed("transport", config.transport.address))?;
        let transport_addr = gateway.local_addr();

        // Observers, in dispatch order.
        let aggregate = Arc::new(AggregateObserver::new(metrics.cache_size));
        let mut observers: Vec<Arc<dyn Observer>> = vec![aggregate.clone() as Arc<dyn Observer>];
        let mut relays = Vec::new();

        let prometheus = if metrics.report_prometheus {
            let sink = PrometheusSink::new();
            let (relay, handle) = RelayObserver::spawn(
                sink.clone(),
                RelayConfig {
                    interval: metrics.prometheus_interval(),
                    capacity: metrics.queue_capacity,
                },
            );
            observers.push(Arc::new(relay));
            relays.push(("prometheus", handle));
            Some(sink)
        } else {
            None
        };

        if metrics.report_statsd {
            let addr = metrics.statsd_address.clone().unwrap_or_default();
            let sink = StatsdSink::connect(addr.as_str(), metrics.statsd_prefix.clone())
                .map_err(|source| StartupError::Statsd { addr, source })?;
            info!(address = %sink.target(), "StatsD relay enabled");
            let (relay, handle) = RelayObserver::spawn(
                sink,
                RelayConfig {
                    interval: metrics.statsd_interval(),
                    capacity: metrics.queue_capacity,
                },
            );
            observers.push(Arc::new(relay));
            relays.push(("statsd", handle));
        }

        let observer_count = observers.len();
        let (ingress, bus) = Subject::new(token.clone(), observers)
            .with_capacity(metrics.queue_capacity)
            .spawn();
        info!(observers = observer_count, capacity = metrics.queue_capacity, "Metrics bus started");

        let instrument = CallInstrument::new(ingress.clone(), base);

        let stats: Arc<dyn StatsApi> = Arc::new(
            BusSink::new(ingress.clone())
                .with_base_tag("service", config.service.name.as_str())
                .with_base_tag("host", host),
        );
        let mut tasks = vec![(
            "runtime-sampler",
            runtime::spawn_runtime_sampler(stats, metrics.runtime_interval(), token.clone()),
        )];
        tasks.push((
            "transport",
            tokio::spawn(gateway.run(instrument, token.clone())),
        ));

        let app = http::router(
            HttpState {
                service: Arc::from(config.service.name.as_str()),
                aggregate: Arc::clone(&aggregate),
                ingress: ingress.clone(),
                prometheus,
            },
            &metrics.dashboard_uri_path,
            &metrics.prometheus_uri_path,
        );
        tasks.push((
            "http",
            tokio::spawn(http::run_http_server(http_listener, app, token.clone())),
        ));

        let announcements = match &announcer {
            Some(announcer) => {
                let registrations = announce::registrations(config, metrics_addr, transport_addr);
                match announce::announce_all(announcer.as_ref(), registrations).await {
                    Ok(announcements) => announcements,
                    Err(e) => {
                        token.cancel();
                        return Err(e.into());
                    }
                }
            }
            None => Announcements::default(),
        };

        info!(
            service = %config.service.name,
            metrics = %metrics_addr,
            transport = %transport_addr,
            announced = announcements.len(),
            "fabricd started"
        );

        Ok(Self {
            token,
            ingress,
            aggregate,
            metrics_addr,
            transport_addr,
            bus,
            relays,
            tasks,
            announcements,
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn ingress(&self) -> &Ingress {
        &self.ingress
    }

    pub fn aggregate(&self) -> &Arc<AggregateObserver> {
        &self.aggregate
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    pub fn transport_addr(&self) -> SocketAddr {
        self.transport_addr
    }

    /// Cancel everything and wait up to `timeout` for it to stop.
    pub async fn shutdown(self, timeout: Duration) -> ShutdownReport {
        self.token.cancel();
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport {
            release_failures: self.announcements.release_all().await,
            ..ShutdownReport::default()
        };

        match tokio::time::timeout_at(deadline, self.bus).await {
            Ok(Ok(stats)) => report.dispatch = Some(stats),
            _ => report.unfinished.push("bus"),
        }
        for (name, handle) in self.relays {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(stats)) => report.relays.push((name, stats)),
                _ => report.unfinished.push(name),
            }
        }
        for (name, handle) in self.tasks {
            if !matches!(tokio::time::timeout_at(deadline, handle).await, Ok(Ok(()))) {
                report.unfinished.push(name);
            }
        }

        if !report.unfinished.is_empty() {
            warn!(tasks = ?report.unfinished, "tasks did not stop before the shutdown deadline");
        }
        report
    }
}

/// Resolve on SIGINT or SIGTERM, or once `token` is cancelled elsewhere.
pub async fn shutdown_signal(token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
        _ = token.cancelled() => info!("Shutdown requested"),
    }
}
