//! Header policy for forwarded calls
//!
//! Outbound headers are built from scratch so inbound credentials never leak
//! upstream. Response headers are copied from upstream with a fixed set of
//! removals and the anti-buffering header added.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::{
    error::{AppError, AppResult},
    proxy::route::{ProviderId, GOOGLE_KEY_HEADER},
};

/// Hop-by-hop headers that must never be forwarded
const HOP_BY_HOP_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Disables response buffering in nginx-style intermediaries
pub const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

const OPENAI_ORGANIZATION: HeaderName = HeaderName::from_static("openai-organization");

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name)
}

/// Content type the caller sent when it is not JSON
///
/// Binary payloads (multipart audio uploads and the like) keep their own
/// content type and skip body mutation.
pub fn binary_content_type(incoming: &HeaderMap) -> Option<HeaderValue> {
    incoming
        .get(header::CONTENT_TYPE)
        .filter(|v| {
            v.to_str()
                .map(|s| !s.trim().is_empty() && !s.to_ascii_lowercase().contains("json"))
                .unwrap_or(true)
        })
        .cloned()
}

/// Build the outbound header set for a provider call
pub fn build_outbound_headers(
    provider: ProviderId,
    api_key: &str,
    incoming: &HeaderMap,
    org_id: Option<&str>,
) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    let content_type = binary_content_type(incoming)
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    for name in [header::ACCEPT, header::USER_AGENT] {
        if let Some(value) = incoming.get(&name) {
            headers.insert(name, value.clone());
        }
    }

    let invalid_key =
        |_| AppError::BadRequest("Credential contains invalid characters".to_string());
    match provider {
        ProviderId::OpenAi => {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(invalid_key)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);

            let org = incoming
                .get(&OPENAI_ORGANIZATION)
                .cloned()
                .or_else(|| org_id.and_then(|o| HeaderValue::from_str(o).ok()));
            if let Some(org) = org {
                headers.insert(OPENAI_ORGANIZATION, org);
            }
        }
        ProviderId::Gemini | ProviderId::Search => {
            let mut value = HeaderValue::from_str(api_key).map_err(invalid_key)?;
            value.set_sensitive(true);
            headers.insert(GOOGLE_KEY_HEADER, value);
        }
    }

    Ok(headers)
}

/// Derive the caller-facing header set from upstream response headers
///
/// Drops `www-authenticate`, `content-length` (the body may be rewritten)
/// and hop-by-hop headers, then sets `X-Accel-Buffering: no`.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();

    for (name, value) in upstream {
        if is_hop_by_hop_header(name)
            || name == header::WWW_AUTHENTICATE
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    filtered
}
