use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AuthService};

use super::handlers::{get_stats, health_check, track_get, track_post, AppState};

pub fn create_router(state: Arc<AppState>, auth_service: Arc<AuthService>) -> Router {
    let tracking_routes = Router::new()
        .route("/track", get(track_get).post(track_post))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    let protected_routes = Router::new()
        .route("/stats", post(get_stats))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(tracking_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
}
