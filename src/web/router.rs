//! Router configuration for Web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{delete_file, download_file, health_check, list_files, upload_file, AppState};
use super::middleware::{create_cors_layer, ip_throttle, security_headers, IpThrottle};

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    throttle: Arc<IpThrottle>,
    cors_origins: &[String],
) -> Router {
    let api_routes = Router::new()
        .route("/upload", post(upload_file))
        .route("/download/:filename", get(download_file))
        .route("/list", get(list_files))
        .route("/delete/:filename", delete(delete_file))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(app_state.body_limit()));

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(security_headers))
                .layer(middleware::from_fn(move |req, next| {
                    let throttle = throttle.clone();
                    ip_throttle(throttle, req, next)
                })),
        )
        .with_state(app_state)
}
