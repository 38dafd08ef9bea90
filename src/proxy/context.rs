//! Per-call request context
//!
//! Holds everything the chain needs about one inbound call, plus a short
//! correlation id and timing used by the structured logging helpers.

use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

/// Context for one inbound call, owned by the handler that created it
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    pub method: Method,
    pub path: String,
    /// Case-insensitive, duplicates preserved in arrival order
    pub headers: HeaderMap,
    /// Query pairs in arrival order
    pub query: Vec<(String, String)>,
    pub body: Bytes,
    /// Budget for the upstream call, armed at dispatch
    pub timeout: Duration,
    /// Provider name, filled in once known
    pub provider: &'static str,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(
        method: Method,
        path: impl Into<String>,
        raw_query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(),
            start_time: Instant::now(),
            method,
            path: path.into(),
            headers,
            query: raw_query.map(parse_query).unwrap_or_default(),
            body,
            timeout,
            provider: "unknown",
        }
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the caller asked for an event-stream with `alt=sse`
    pub fn wants_sse(&self) -> bool {
        self.query_param("alt") == Some("sse")
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    /// Log request initiation
    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
            body_size = self.body.len(),
            "Request started"
        );
    }

    /// Log request being sent to upstream
    pub fn log_upstream_request(&self, url: &str, body_size: usize) {
        debug!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            url = %url,
            body_size = %body_size,
            elapsed_ms = %self.elapsed_ms(),
            "Sending request to upstream"
        );
    }

    /// Log response received from upstream
    pub fn log_upstream_response(&self, status: u16, streaming: bool) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            path = %self.path,
            status = %status,
            streaming = %streaming,
            elapsed_ms = %self.elapsed_ms(),
            "Response received from upstream"
        );
    }

    /// Log stream ended
    pub fn log_stream_ended(&self, chunks: usize, bytes: usize) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            path = %self.path,
            chunks = %chunks,
            bytes = %bytes,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response ended"
        );
    }

    /// Log a warning condition
    pub fn log_warning(&self, message: &str) {
        warn!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            path = %self.path,
            elapsed_ms = %self.elapsed_ms(),
            message = %message,
            "Warning during request"
        );
    }

    /// Log request failure
    pub fn log_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            method = %self.method,
            path = %self.path,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Request failed"
        );
    }

    /// Log timeout
    pub fn log_timeout(&self) {
        error!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            path = %self.path,
            timeout_ms = %self.timeout.as_millis(),
            elapsed_ms = %self.elapsed_ms(),
            "Request timed out"
        );
    }

    /// Create a tracing span for this request
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "gateway_request",
            trace_id = %self.trace_id,
            method = %self.method,
            path = %self.path,
        )
    }
}

/// Split a raw query string into decoded pairs, keeping order and duplicates
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    reqwest::Url::parse(&format!("http://query.invalid/?{}", raw))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}
