use crate::subscription::broadcaster::{Broadcaster, Subscription};
use crate::subscription::protocol::ClientEvent;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why a subscriber session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    SendFailed,
    BroadcasterClosed,
    Shutdown,
}

/// Drives one subscriber connection: initial snapshot, then every published
/// snapshot, until the client leaves, a send fails, or the server shuts down.
///
/// Transport-agnostic: the WebSocket handler adapts its socket halves into a
/// `Sink<String>` and a `Stream<Item = ClientEvent>`.
pub struct SubscriberSession {
    subscription: Subscription,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
}

impl SubscriberSession {
    pub fn new(
        subscription: Subscription,
        broadcaster: Arc<Broadcaster>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            broadcaster,
            cancel,
        }
    }

    /// Run the session to completion.
    ///
    /// The subscription is dropped on return, which removes the subscriber
    /// from the broadcaster's set.
    pub async fn run<S, R>(mut self, mut sink: S, mut inbound: R) -> SessionEnd
    where
        S: Sink<String> + Unpin,
        S::Error: Display,
        R: Stream<Item = ClientEvent> + Unpin,
    {
        let subscriber_id = self.subscription.id();

        if let Some(initial) = self.subscription.take_initial() {
            if let Err(e) = sink.send(initial.to_string()).await {
                warn!(subscriber_id = %subscriber_id, error = %e, "Failed to send initial snapshot");
                return SessionEnd::SendFailed;
            }
        }

        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break SessionEnd::Shutdown;
                }

                event = inbound.next() => {
                    match event {
                        Some(ClientEvent::Refresh) => {
                            let frame = match self.broadcaster.current_frame() {
                                Ok(frame) => frame,
                                Err(e) => {
                                    error!(error = %e, "Failed to build refresh snapshot");
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(frame.to_string()).await {
                                warn!(subscriber_id = %subscriber_id, error = %e, "Failed to send refresh snapshot");
                                break SessionEnd::SendFailed;
                            }
                        }
                        Some(ClientEvent::Close) | None => {
                            break SessionEnd::ClientClosed;
                        }
                    }
                }

                frame = self.subscription.next_frame() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(frame.to_string()).await {
                                warn!(subscriber_id = %subscriber_id, error = %e, "Failed to send snapshot, dropping subscriber");
                                break SessionEnd::SendFailed;
                            }
                        }
                        None => {
                            error!("Snapshot broadcast channel closed");
                            break SessionEnd::BroadcasterClosed;
                        }
                    }
                }
            }
        };

        let _ = sink.close().await;
        info!(subscriber_id = %subscriber_id, reason = ?end, "Subscriber session ended");
        end
    }
}
