//! Service-discovery announcements.
//!
//! Every successful [`Announcer::announce`] yields an [`Announcement`]
//! holding the future that undoes it. The daemon collects them into
//! [`Announcements`] and runs the release futures in reverse order during
//! shutdown. Each release runs exactly once; a failing release is logged and
//! the rest still run.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Announcement errors.
#[derive(Debug, Error)]
pub enum AnnounceError {
    #[error("announcement of {path} failed: {reason}")]
    AnnouncementFailed { path: String, reason: String },
    #[error("release of {path} failed: {reason}")]
    ReleaseFailed { path: String, reason: String },
    #[error("registry client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// One endpoint to announce: (service name, address, registry path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub service: String,
    pub address: String,
    pub path: String,
}

impl Registration {
    pub fn new(
        service: impl Into<String>,
        address: impl ToString,
        path: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            address: address.to_string(),
            path: path.into(),
        }
    }
}

type ReleaseFuture = Pin<Box<dyn Future<Output = Result<(), AnnounceError>> + Send>>;

/// Handle to an active announcement.
pub struct Announcement {
    path: String,
    release: Option<ReleaseFuture>,
}

impl Announcement {
    /// Announcement released by `release`.
    pub fn new<F>(path: impl Into<String>, release: F) -> Self
    where
        F: Future<Output = Result<(), AnnounceError>> + Send + 'static,
    {
        Self {
            path: path.into(),
            release: Some(Box::pin(release)),
        }
    }

    /// Registry path this announcement covers.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run the release future. A second call is a no-op.
    pub async fn release(&mut self) -> Result<(), AnnounceError> {
        match self.release.take() {
            Some(release) => release.await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Announcement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Announcement")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Announcements in registration order.
#[derive(Debug, Default)]
pub struct Announcements {
    entries: Vec<Announcement>,
}

impl Announcements {
    pub fn push(&mut self, announcement: Announcement) {
        self.entries.push(announcement);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything, last registered first. Returns the failure count.
    pub async fn release_all(mut self) -> usize {
        let mut failures = 0;
        while let Some(mut announcement) = self.entries.pop() {
            match announcement.release().await {
                Ok(()) => info!(path = %announcement.path, "announcement released"),
                Err(e) => {
                    failures += 1;
                    warn!(path = %announcement.path, error = %e, "announcement release failed");
                }
            }
        }
        failures
    }
}

/// Registers endpoints with a discovery backend.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, registration: Registration) -> Result<Announcement, AnnounceError>;
}

/// Announce every registration in order.
///
/// Stops at the first failure and releases what was already announced
/// before returning the error.
pub async fn announce_all(
    announcer: &dyn Announcer,
    registrations: Vec<Registration>,
) -> Result<Announcements, AnnounceError> {
    let mut announcements = Announcements::default();
    for registration in registrations {
        let path = registration.path.clone();
        match announcer.announce(registration).await {
            Ok(announcement) => {
                info!(%path, "endpoint announced");
                announcements.push(announcement);
            }
            Err(e) => {
                let rolled_back = announcements.len();
                let failures = announcements.release_all().await;
                debug!(rolled_back, failures, "partial announcements released");
                return Err(e);
            }
        }
    }
    Ok(announcements)
}

/// Registrations the configuration asks for. Empty when discovery is off.
///
/// `metrics` and `transport` are the addresses the daemon actually bound,
/// which differ from the configured ones when port 0 was requested.
pub fn registrations(
    config: &Config,
    metrics: std::net::SocketAddr,
    transport: std::net::SocketAddr,
) -> Vec<Registration> {
    let discovery = &config.discovery;
    if !discovery.enabled {
        return Vec::new();
    }

    let service = &config.service.name;
    let mut out = Vec::new();
    if let Some(path) = &discovery.metrics_path {
        out.push(Registration::new(service, metrics, path));
    }
    if let Some(path) = &discovery.transport_path {
        out.push(Registration::new(service, transport, path));
    }
    if let (Some(path), Some(gateway)) = (&discovery.gateway_path, config.transport.gateway_address)
    {
        out.push(Registration::new(service, gateway, path));
    }
    out
}

/// Registry record body.
#[derive(Debug, Serialize)]
struct Record<'a> {
    service: &'a str,
    address: &'a str,
    path: &'a str,
    node: &'a str,
}

/// HTTP registry: `PUT {registry_url}/{path}/{node}` announces,
/// `DELETE` on the same URL releases.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base: String,
    node: String,
}

impl HttpRegistry {
    /// Client with a fresh node id.
    pub fn new(registry_url: &str, timeout: Duration) -> Result<Self, AnnounceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: registry_url.trim_end_matches('/').to_string(),
            node: Uuid::new_v4().to_string(),
        })
    }

    /// Node id this process announces under.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// URL of `path`'s record for this node.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base, path.trim_matches('/'), self.node)
    }
}

#[async_trait]
impl Announcer for HttpRegistry {
    async fn announce(&self, registration: Registration) -> Result<Announcement, AnnounceError> {
        let url = self.url_for(&registration.path);
        let failed = |e: reqwest::Error| AnnounceError::AnnouncementFailed {
            path: registration.path.clone(),
            reason: e.to_string(),
        };

        let record = Record {
            service: &registration.service,
            address: &registration.address,
            path: &registration.path,
            node: &self.node,
        };
        self.client
            .put(&url)
            .json(&record)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?;
        debug!(%url, "registry record written");

        let client = self.client.clone();
        let path = registration.path.clone();
        Ok(Announcement::new(registration.path, async move {
            client
                .delete(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map(|_| ())
                .map_err(|e| AnnounceError::ReleaseFailed {
                    path,
                    reason: e.to_string(),
                })
        }))
    }
}
