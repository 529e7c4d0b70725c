//! Instrumented transport listener.
//!
//! Accepts TCP connections until cancellation. The application protocol is
//! not part of this daemon: each connection is read until EOF and closed,
//! with connection and byte counts plus per-connection timing recorded
//! through [`CallInstrument`].

use fabric_metrics::CallInstrument;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Method label used for whole-connection timings.
pub const CONNECTION_METHOD: &str = "connection";

const READ_BUFFER: usize = 8 * 1024;

/// The transport listener.
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Gateway {
    /// Bind the listener. Failure is fatal to startup.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Transport listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `token` is cancelled.
    #[instrument(skip_all, name = "gateway", fields(address = %self.local_addr))]
    pub async fn run(self, instrument: CallInstrument, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Transport connection accepted");
                        let instrument = instrument.clone();
                        let token = token.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, instrument, token).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept transport connection");
                    }
                },
            }
        }
        info!("Transport listener stopped");
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    instrument: CallInstrument,
    token: CancellationToken,
) {
    let _connection = instrument.connection_opened();
    let mut timer = instrument.begin(CONNECTION_METHOD);
    let mut buf = vec![0u8; READ_BUFFER];
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                timer.fail("shutdown");
                break;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => received += n as u64,
                Err(e) => {
                    debug!(%addr, error = %e, "Transport connection read failed");
                    timer.fail("io_error");
                    break;
                }
            },
        }
    }

    instrument.record_bytes(CONNECTION_METHOD, received, 0);
    debug!(%addr, received, "Transport connection closed");
}
