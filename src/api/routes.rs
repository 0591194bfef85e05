use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::analytics::Analytics;
use crate::auth::{auth_middleware, AuthService};
use crate::config::WebSocketConfig;

use super::content::{content_view_count, content_view_history, track_content_view};
use super::handlers::{
    filtered_stats, health_check, page_views, track_view, view_series, AppState,
};
use super::ws::ws_handler;

pub fn create_api_router(
    analytics: Analytics,
    auth_service: Arc<AuthService>,
    websocket: WebSocketConfig,
) -> Router {
    let state = Arc::new(AppState {
        analytics,
        websocket,
    });

    // Write-only endpoints sit behind the API key when one is configured
    let protected_routes = Router::new()
        .route("/api/v1/analytics/track", post(track_view))
        .route("/api/v1/views/track", post(track_content_view))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(Arc::clone(&state));

    let public_routes = Router::new()
        .route("/api/v1/analytics", get(filtered_stats))
        .route("/api/v1/analytics/views", get(page_views))
        .route("/api/v1/analytics/series", get(view_series))
        .route("/api/v1/views/count", get(content_view_count))
        .route("/api/v1/views/analytics", get(content_view_history))
        .route("/ws/analytics", get(ws_handler))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .merge(public_routes)
}
