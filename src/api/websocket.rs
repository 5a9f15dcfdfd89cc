use crate::subscription::{Broadcaster, ClientEvent, SubscriberSession};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state for the subscription endpoint
#[derive(Clone)]
pub struct WsAppState {
    pub broadcaster: Arc<Broadcaster>,
    /// Cancelled on server shutdown; ends every session
    pub cancel: CancellationToken,
}

/// GET {path} - WebSocket upgrade for snapshot subscribers
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    peer: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<WsAppState>>,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    info!(peer = ?peer, "Subscriber upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Create the subscription router serving `path`
pub fn create_ws_router(state: Arc<WsAppState>, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .with_state(state)
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, peer: Option<SocketAddr>, state: Arc<WsAppState>) {
    let subscription = match state.broadcaster.register(peer) {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(peer = ?peer, error = %e, "Failed to register subscriber");
            return;
        }
    };

    let (sender, receiver) = socket.split();

    let sink = sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));

    // Text frames request a refresh; pings are answered by the transport
    let inbound = receiver.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(_)) => Some(ClientEvent::Refresh),
            Ok(Message::Close(_)) | Err(_) => Some(ClientEvent::Close),
            Ok(_) => None,
        })
    });

    let session = SubscriberSession::new(
        subscription,
        Arc::clone(&state.broadcaster),
        state.cancel.clone(),
    );
    session.run(sink, Box::pin(inbound)).await;
}
