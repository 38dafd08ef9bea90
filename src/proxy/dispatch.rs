//! Upstream dispatcher
//!
//! Defines the seam between the gateway chain and the network, and the
//! reqwest-backed implementation used in production.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use tracing::{debug, instrument, warn};

use crate::{
    error::{AppError, AppResult},
    proxy::deadline::Deadline,
};

/// Stream type for upstream response bodies
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Fully built outbound call. Built fresh per inbound call, never reused.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Upstream response body
pub enum UpstreamBody {
    /// Upstream sent no body
    Empty,
    /// Already materialized bytes
    Full(Bytes),
    /// Lazily read body
    Stream(ByteStream),
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamBody::Empty => f.write_str("Empty"),
            UpstreamBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            UpstreamBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl UpstreamBody {
    /// View the body as a stream regardless of how it was produced
    pub fn into_stream(self) -> ByteStream {
        match self {
            UpstreamBody::Empty => Box::pin(futures::stream::empty()),
            UpstreamBody::Full(bytes) => Box::pin(futures::stream::once(async move { Ok(bytes) })),
            UpstreamBody::Stream(stream) => stream,
        }
    }

    /// Read the whole body into memory
    pub async fn collect(self) -> Result<Bytes, std::io::Error> {
        match self {
            UpstreamBody::Empty => Ok(Bytes::new()),
            UpstreamBody::Full(bytes) => Ok(bytes),
            UpstreamBody::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                Ok(chunks.concat().into())
            }
        }
    }
}

/// Response handed to the response pipeline
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    /// Whether upstream answered with an event-stream
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false)
    }
}

/// Trait for issuing an outbound call
///
/// Implementations MUST:
/// - Give up with `AppError::UpstreamTimeout` once `deadline` fires
/// - Surface redirects to the caller instead of following them
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Get the implementation name for logging
    fn name(&self) -> &'static str;

    /// Send one outbound call
    async fn dispatch(
        &self,
        request: OutboundRequest,
        deadline: &Deadline,
    ) -> AppResult<UpstreamResponse>;
}

/// Time allowed to establish a connection, separate from the call deadline
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed dispatcher
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Create a dispatcher with redirects disabled
    pub fn new() -> AppResult<Self> {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    fn with_connect_timeout(connect_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn dispatch(
        &self,
        request: OutboundRequest,
        deadline: &Deadline,
    ) -> AppResult<UpstreamResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match deadline.within(builder.send()).await {
            Ok(Ok(response)) => response,
            // Only the call deadline is reported as a timeout; a failed
            // connect is a transport error
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to send request to upstream");
                return Err(e.into());
            }
            Err(_) => return Err(AppError::UpstreamTimeout(deadline.timeout().as_secs())),
        };

        let status = response.status();
        let headers = response.headers().clone();
        debug!(status = %status, "Received response headers from upstream");

        let body = if response.content_length() == Some(0) {
            UpstreamBody::Empty
        } else {
            UpstreamBody::Stream(Box::pin(
                response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other)),
            ))
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
