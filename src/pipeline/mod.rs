//! Response pipeline
//!
//! Chooses buffered or streaming mode once per call, then either materializes
//! and transforms a JSON body or relays the upstream body chunk by chunk.
//! Non-2xx responses are passed through untouched in either mode.

pub mod citations;
pub mod models;

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::Features,
    error::{AppError, AppResult},
    proxy::{
        context::RequestContext,
        deadline::{Deadline, DeadlineGuard},
        dispatch::{UpstreamBody, UpstreamResponse},
        headers::response_headers,
        route::ProviderId,
    },
    streaming::{relay, ChunkTransform},
};

use citations::{embed_citations, sources_from_response, SearchSource};

/// What the rewriter learned about the call that shapes the response
#[derive(Debug, Clone)]
pub struct ResponseHints {
    pub provider: ProviderId,
    /// Caller asked for an event-stream (`alt=sse` or `"stream": true`)
    pub streaming_requested: bool,
    /// Model-list endpoint; always buffered
    pub listing: bool,
    /// A default search tool was injected into the request body
    pub search_tool_injected: bool,
    /// Search results closed over from the request body
    pub citation_sources: Vec<SearchSource>,
}

/// Terminal mode of the pipeline, fixed before the body is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Buffered,
    Streaming,
}

/// Pick the mode for one call
pub fn select_mode(hints: &ResponseHints, upstream: &UpstreamResponse) -> ResponseMode {
    if hints.listing {
        ResponseMode::Buffered
    } else if hints.streaming_requested || upstream.is_event_stream() {
        ResponseMode::Streaming
    } else {
        ResponseMode::Buffered
    }
}

#[derive(Debug, Error)]
enum TransformError {
    #[error("upstream body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Turn an upstream response into the caller-facing response
///
/// `guard` keeps the deadline armed for as long as the body is being read.
pub async fn respond(
    ctx: RequestContext,
    hints: ResponseHints,
    features: &Features,
    upstream: UpstreamResponse,
    deadline: Deadline,
    guard: DeadlineGuard,
) -> AppResult<Response> {
    let mode = select_mode(&hints, &upstream);
    let status = upstream.status;
    let headers = response_headers(&upstream.headers);
    ctx.log_upstream_response(status.as_u16(), mode == ResponseMode::Streaming);

    if matches!(upstream.body, UpstreamBody::Empty) {
        return Ok(build(status, headers, Body::empty()));
    }

    if !status.is_success() {
        let body = relay(
            ctx,
            upstream.body.into_stream(),
            ChunkTransform::default(),
            deadline,
            guard,
        );
        return Ok(build(status, headers, Body::from_stream(body)));
    }

    match mode {
        ResponseMode::Streaming => {
            let transform = ChunkTransform {
                link_formatting: features.link_formatting,
                sources: Some(hints.citation_sources.clone()).filter(|s| !s.is_empty()),
            };
            let body = relay(ctx, upstream.body.into_stream(), transform, deadline, guard);
            Ok(build(status, headers, Body::from_stream(body)))
        }
        ResponseMode::Buffered => {
            let raw = match deadline.within(upstream.body.collect()).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    ctx.log_error(&format!("Failed to read upstream body: {}", e));
                    return Err(AppError::Internal(anyhow::Error::new(e)));
                }
                Err(_) => {
                    ctx.log_timeout();
                    return Err(AppError::UpstreamTimeout(deadline.timeout().as_secs()));
                }
            };
            drop(guard);

            let body = transform_buffered(&ctx, &hints, features, raw);
            Ok(build(status, headers, Body::from(body)))
        }
    }
}

/// Apply buffered transforms, falling back to the original bytes on failure
fn transform_buffered(
    ctx: &RequestContext,
    hints: &ResponseHints,
    features: &Features,
    raw: Bytes,
) -> Bytes {
    let wants_filter = hints.listing && features.disable_restricted_models;
    let wants_citations = hints.search_tool_injected || !hints.citation_sources.is_empty();
    if !wants_filter && !wants_citations {
        return raw;
    }

    match apply_transforms(ctx, hints, wants_filter, wants_citations, &raw) {
        Ok(Some(rewritten)) => rewritten,
        Ok(None) => raw,
        Err(e) => {
            ctx.log_warning(&format!("Response transform skipped: {}", e));
            metrics::counter!("courier_transform_fallbacks_total", "transform" => "buffered")
                .increment(1);
            raw
        }
    }
}

/// `Ok(None)` when nothing changed, so the original bytes are kept verbatim
fn apply_transforms(
    ctx: &RequestContext,
    hints: &ResponseHints,
    wants_filter: bool,
    wants_citations: bool,
    raw: &[u8],
) -> Result<Option<Bytes>, TransformError> {
    let mut body: Value = serde_json::from_slice(raw)?;
    let mut changed = false;

    if wants_filter {
        let removed = models::filter_model_list(&mut body);
        if removed > 0 {
            tracing::debug!(trace_id = %ctx.trace_id, removed, "Filtered restricted models");
            changed = true;
        }
    }

    if wants_citations {
        let mut sources = if hints.search_tool_injected {
            sources_from_response(hints.provider, &body)
        } else {
            Vec::new()
        };
        if sources.is_empty() {
            sources = hints.citation_sources.clone();
        }
        if embed_citations(hints.provider, &mut body, &sources) > 0 {
            changed = true;
        }
    }

    if !changed {
        return Ok(None);
    }
    Ok(Some(Bytes::from(serde_json::to_vec(&body)?)))
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
