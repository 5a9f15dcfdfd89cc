// Router-level checks for the subscription endpoint.
//
// Note: Tests use tower::ServiceExt::oneshot. A plain GET reaches the
// WebSocketUpgrade extractor, which rejects it (no upgrade headers / no hyper
// OnUpgrade extension in test requests). The tests verify routing, not the
// upgrade itself, which the end-to-end tests cover.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use proximity::{
    api::{create_ws_router, WsAppState},
    state::StateStore,
    subscription::Broadcaster,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn make_router(path: &str) -> Router {
    let store = Arc::new(StateStore::new());
    let state = Arc::new(WsAppState {
        broadcaster: Arc::new(Broadcaster::new(store, 4)),
        cancel: CancellationToken::new(),
    });
    create_ws_router(state, path)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_subscription_path_is_routed() {
    let app = make_router("/sensors");
    let resp = app.oneshot(get_request("/sensors")).await.unwrap();
    // Route matched; upgrade extractor rejects the non-upgrade request
    assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    assert!(!resp.status().is_success());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let app = make_router("/sensors");
    let resp = app.oneshot(get_request("/api/ws")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_custom_path() {
    let app = make_router("/live");
    let resp = app.clone().oneshot(get_request("/live")).await.unwrap();
    assert_ne!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.oneshot(get_request("/sensors")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
