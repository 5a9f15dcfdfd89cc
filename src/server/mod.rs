// Server assembly: binds both listeners, runs them, shuts down gracefully

mod signal;

pub use signal::wait_for_shutdown_signal;

use crate::api::{create_ws_router, WsAppState};
use crate::config::ProximityConfig;
use crate::ingest::{HandlerSettings, IngestListener, Ingestor};
use crate::persistence::PersistenceLog;
use crate::state::StateStore;
use crate::subscription::Broadcaster;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The aggregation server with both endpoints bound and ready to run.
pub struct Server {
    config: ProximityConfig,
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    ingest: IngestListener,
    subscription_listener: TcpListener,
    cancel: CancellationToken,
}

impl Server {
    /// Open the persistence log and bind both listeners.
    ///
    /// Any failure here is a startup error; the caller should exit.
    pub async fn bind(config: ProximityConfig) -> Result<Self> {
        let store = Arc::new(StateStore::new());
        let log = Arc::new(PersistenceLog::open(&config.persistence.path)?);
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&store),
            config.subscription.buffer,
        ));

        let ingestor = Ingestor::new(Arc::clone(&store), log, Arc::clone(&broadcaster));
        let ingest = IngestListener::bind(
            &config.ingest.bind,
            ingestor,
            HandlerSettings::from(&config.ingest),
        )
        .await?;

        let subscription_listener = TcpListener::bind(&config.subscription.bind)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind subscription listener on {}",
                    config.subscription.bind
                )
            })?;

        Ok(Self {
            config,
            store,
            broadcaster,
            ingest,
            subscription_listener,
            cancel: CancellationToken::new(),
        })
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr> {
        self.ingest.local_addr()
    }

    pub fn subscription_addr(&self) -> Result<SocketAddr> {
        self.subscription_listener
            .local_addr()
            .context("Failed to read subscription listener address")
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until the shutdown token is cancelled, then drain connections.
    pub async fn run(self) -> Result<()> {
        let grace = self.config.shutdown.grace();

        info!(
            ingest = %self.ingest_addr()?,
            subscription = %self.subscription_addr()?,
            path = %self.config.subscription.path,
            log = %self.config.persistence.path.display(),
            "Proximity server running"
        );

        let ingest_task = tokio::spawn(self.ingest.run(self.cancel.clone(), grace));

        let ws_state = Arc::new(WsAppState {
            broadcaster: Arc::clone(&self.broadcaster),
            cancel: self.cancel.clone(),
        });
        let app = create_ws_router(ws_state, &self.config.subscription.path);
        let listener = self.subscription_listener;
        let shutdown = self.cancel.clone().cancelled_owned();
        let mut subscription_task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
        });

        let early_exit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            joined = &mut subscription_task => Some(joined),
        };

        // The subscription server only returns on its own if it failed
        if early_exit.is_some() {
            warn!("Subscription listener exited unexpectedly, shutting down");
            self.cancel.cancel();
        } else {
            info!("Shutdown requested, stopping listeners");
        }

        ingest_task.await.context("Ingest listener task failed")?;

        let subscription_result = match early_exit {
            Some(joined) => Some(joined),
            None => {
                let drained = tokio::time::timeout(grace, &mut subscription_task).await;
                match drained {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        warn!("Subscriber connections did not close within grace period, aborting");
                        subscription_task.abort();
                        None
                    }
                }
            }
        };
        if let Some(joined) = subscription_result {
            joined
                .context("Subscription listener task failed")?
                .context("Subscription listener error")?;
        }

        info!(sensors = self.store.len(), "Proximity server stopped");
        Ok(())
    }
}
