//! Gateway endpoint
//!
//! Every `/api/<provider>/<sub-path>` call runs the same chain:
//! credential gate, provider router, request rewriter, dispatcher and
//! response pipeline. Each stage gates the next.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::json;
use tracing::Instrument;

use crate::{
    error::{AppError, AppResult},
    middleware::auth::authenticate,
    pipeline,
    proxy::{
        context::RequestContext, deadline::Deadline, rewrite::RequestRewriter,
        route::{ProviderId, ProviderRouter},
    },
    routes::metrics::{record_request, record_upstream_timeout},
    AppState,
};

/// Handle one gateway call
pub async fn handle(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return AppError::BadRequest(format!("Failed to read request body: {}", e))
                .into_response()
        }
    };

    let mut ctx = RequestContext::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query(),
        parts.headers,
        body,
        state.config.upstream_timeout,
    );
    if let Ok(provider) = ProviderId::from_path(&ctx.path) {
        ctx.provider = provider.name();
    }
    let span = ctx.create_span();

    async move {
        ctx.log_request_start();
        let log_ctx = RequestContext {
            body: Bytes::new(),
            ..ctx.clone()
        };

        let result = forward(&state, ctx).await;

        let status = match &result {
            Ok(response) => response.status(),
            Err(e) => {
                if let AppError::UpstreamTimeout(_) = e {
                    log_ctx.log_timeout();
                    record_upstream_timeout(log_ctx.provider);
                } else {
                    log_ctx.log_error(&e.to_string());
                }
                e.status()
            }
        };
        record_request(
            log_ctx.provider,
            status.as_u16(),
            log_ctx.start_time.elapsed().as_secs_f64(),
        );

        result.unwrap_or_else(IntoResponse::into_response)
    }
    .instrument(span)
    .await
}

/// Run the gateway chain for an inbound call
async fn forward(state: &AppState, ctx: RequestContext) -> AppResult<Response> {
    let provider = ProviderId::from_path(&ctx.path)?;

    let credential = authenticate(&ctx.headers, provider, &state.config).into_result(provider)?;
    let matched = ProviderRouter::new(state.config.clone()).route(&ctx.path)?;
    let plan = RequestRewriter::new(state.config.clone()).rewrite(&ctx, &matched, &credential)?;

    ctx.log_upstream_request(
        &plan.outbound.url,
        plan.outbound.body.as_ref().map_or(0, Bytes::len),
    );

    let (deadline, guard) = Deadline::arm(ctx.timeout);
    let upstream = state.upstream.dispatch(plan.outbound, &deadline).await?;

    pipeline::respond(ctx, plan.hints, &state.config.features, upstream, deadline, guard).await
}

/// Acknowledge an `OPTIONS` call without running the chain
pub fn acknowledge() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "*"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
        Json(json!({ "body": "OK" })),
    )
        .into_response()
}

/// Anything outside the gateway prefix is rejected
pub async fn not_allowed(request: Request) -> Response {
    AppError::Forbidden(request.uri().path().to_string()).into_response()
}
