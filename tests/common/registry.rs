//! In-process discovery registry that records every request.

#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use std::net::SocketAddr;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Shared {
    log: Arc<Mutex<Vec<String>>>,
    reject_puts: bool,
}

/// Registry answering 200 (or 500 for PUTs when rejecting).
pub struct FakeRegistry {
    pub addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
}

async fn record(State(shared): State<Shared>, method: Method, uri: Uri) -> StatusCode {
    shared.log.lock().push(format!("{} {}", method, uri.path()));
    if shared.reject_puts && method == Method::PUT {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

impl FakeRegistry {
    pub async fn start(reject_puts: bool) -> anyhow::Result<Self> {
        let shared = Shared {
            reject_puts,
            ..Shared::default()
        };
        let log = Arc::clone(&shared.log);
        let app = Router::new().fallback(record).with_state(shared);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, log })
    }

    pub fn url(&self) -> String {
        format!("http://{}/v1/services", self.addr)
    }

    /// Requests seen so far as `"METHOD /path"`.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}
