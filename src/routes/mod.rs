// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - health.rs: Health check and metrics endpoints
// - admin.rs: Management API for the routing registry
// - middleware.rs: Request logging
//
// Everything the named routes do not own falls through to the proxy
// pipeline, which serves any method on any path.
//
// ============================================================================

pub mod admin;
pub mod health;
pub mod middleware;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::gateway::handler::proxy_request;

/// Create the main application router with all routes
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    crate::metrics::init();

    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics_endpoint))
        // Management API
        .route("/apis", get(admin::list_apis))
        .route(
            "/apis/:api_id",
            get(admin::get_api)
                .post(admin::add_api)
                .put(admin::update_api)
                .delete(admin::delete_api),
        )
        // Proxy surface: any other method and path
        .fallback(proxy_request)
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .into_inner(),
        )
        .with_state(ctx)
}
