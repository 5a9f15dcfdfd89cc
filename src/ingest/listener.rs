use crate::ingest::handler::{ConnectionHandler, HandlerSettings, Ingestor};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause after a failed accept so persistent errors (e.g. fd exhaustion) don't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts sensor connections and runs one tracked handler task per connection.
pub struct IngestListener {
    listener: TcpListener,
    ingestor: Ingestor,
    settings: HandlerSettings,
}

impl IngestListener {
    /// Bind the sensor endpoint. Failure here is fatal to startup.
    pub async fn bind(addr: &str, ingestor: Ingestor, settings: HandlerSettings) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind ingest listener on {}", addr))?;

        Ok(Self {
            listener,
            ingestor,
            settings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read ingest listener address")
    }

    /// Accept until `cancel` fires, then drain handlers.
    ///
    /// Handlers see the same token and close after their current message;
    /// any still running after `grace` are aborted.
    pub async fn run(self, cancel: CancellationToken, grace: Duration) {
        let addr = self.listener.local_addr().ok();
        info!(addr = ?addr, "Ingest listener accepting sensor connections");

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Sensor connection handler panicked");
                        }
                    }
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                            }
                            let handler = ConnectionHandler::new(
                                Some(peer),
                                self.ingestor.clone(),
                                self.settings,
                                cancel.child_token(),
                            );
                            handlers.spawn(handler.run(stream));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept sensor connection");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                            }
                        }
                    }
                }
            }
        }

        // Stop accepting before waiting on in-flight connections
        drop(self.listener);

        let in_flight = handlers.len();
        info!(connections = in_flight, "Ingest listener stopped, draining sensor connections");

        let drained = tokio::time::timeout(grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = handlers.len(),
                "Sensor connections did not close within grace period, aborting"
            );
            handlers.shutdown().await;
        }
    }
}
