//! HTTP routes for Courier
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod gateway;
pub mod health;
pub mod metrics;

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::Method,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

use crate::{error::AppError, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    let gateway_routes = Router::new().route(
        "/api/:provider/*path",
        get(gateway::handle).post(gateway::handle),
    );

    // Public routes (health checks, metrics)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(gateway_routes)
        .fallback(gateway::not_allowed)
        // First layer is outermost: a panic anywhere below still yields the
        // error envelope
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(acknowledge_options))
                .layer(cors),
        )
        .with_state(state)
}

/// Answer `OPTIONS` on gateway paths before CORS preflight handling sees it
async fn acknowledge_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS && request.uri().path().starts_with("/api/") {
        return gateway::acknowledge();
    }
    next.run(request).await
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");
    AppError::Internal(anyhow::anyhow!("handler panicked")).into_response()
}
