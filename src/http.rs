//! HTTP server for the metrics dashboard and Prometheus scrape endpoint.
//!
//! Both routes are read-only views over observers registered on the bus.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use fabric_metrics::sink::prometheus::PrometheusSink;
use fabric_metrics::{AggregateObserver, Ingress, IngressStats, Snapshot};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared handler state.
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<str>,
    pub aggregate: Arc<AggregateObserver>,
    pub ingress: Ingress,
    pub prometheus: Option<PrometheusSink>,
}

/// Dashboard response body.
#[derive(Debug, Serialize)]
pub struct DashboardReport {
    pub service: String,
    pub ingress: IngressStats,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Handler for the dashboard route - aggregator snapshot as JSON.
async fn dashboard_handler(State(state): State<HttpState>) -> Json<DashboardReport> {
    Json(DashboardReport {
        service: state.service.to_string(),
        ingress: state.ingress.stats(),
        snapshot: state.aggregate.report(),
    })
}

/// Handler for the Prometheus route - text exposition format.
async fn prometheus_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let body = state
        .prometheus
        .as_ref()
        .map(PrometheusSink::render)
        .unwrap_or_default();
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}

/// Build the router. The Prometheus route only exists when a sink is set.
pub fn router(state: HttpState, dashboard_path: &str, prometheus_path: &str) -> Router {
    let mut app = Router::new().route(dashboard_path, get(dashboard_handler));
    if state.prometheus.is_some() {
        app = app.route(prometheus_path, get(prometheus_handler));
    }
    app.with_state(state)
}

/// Bind the HTTP listener. Failure is fatal to startup.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Metrics HTTP server listening");
    Ok(listener)
}

/// Serve `app` until `token` is cancelled.
pub async fn run_http_server(listener: TcpListener, app: Router, token: CancellationToken) {
    let shutdown = async move { token.cancelled().await };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }
    tracing::debug!("Metrics HTTP server stopped");
}
