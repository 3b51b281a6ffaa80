//! HTTP surface: Torznab indexer endpoint, qBittorrent WebAPI v2 shim, STRM
//! proxy, and the legacy job-control API (§6). One [`AppState`] wraps the
//! process-wide [`crate::state::SharedState`] and is shared by every route.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{Router, middleware, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
mod jobs;
mod observability;
mod qbittorrent;
mod strm_proxy;
mod torznab;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
}

pub async fn create_app_state(shared: Arc<SharedState>) -> Arc<AppState> {
    Arc::new(AppState { shared })
}

pub async fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.shared.config().await.server.cors_allowed_origins.clone();

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/torznab/api", get(torznab::handle))
        .merge(qbittorrent::router())
        .merge(strm_proxy::router())
        .merge(jobs::router())
        .route("/metrics", get(observability::get_metrics))
        .route("/healthz", get(observability::healthz))
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::track_metrics))
        .with_state(state)
}
