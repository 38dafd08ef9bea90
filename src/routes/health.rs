//! Health check endpoints
//!
//! - `/health` - status with provider configuration summary
//! - `/health/live` - liveness probe

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::{proxy::route::ProviderId, AppState};

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Whether a provider can serve callers that bring no key of their own
#[derive(Debug, Serialize)]
pub struct ProviderCheck {
    pub provider: &'static str,
    pub server_key: bool,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub providers: Vec<ProviderCheck>,
}

/// Simple health response for liveness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

/// Full health check endpoint
///
/// Degraded when no provider has a server-side key, in which case only
/// callers presenting their own key can be served.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let providers: Vec<ProviderCheck> = [ProviderId::OpenAi, ProviderId::Gemini, ProviderId::Search]
        .into_iter()
        .map(|provider| ProviderCheck {
            provider: provider.name(),
            server_key: provider.server_key(&state.config).is_some(),
        })
        .collect();

    let status = if providers.iter().any(|p| p.server_key) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        providers,
    };

    (StatusCode::OK, Json(response))
}

/// Liveness probe endpoint
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
