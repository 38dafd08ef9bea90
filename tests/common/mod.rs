//! Common test utilities for Courier
//!
//! Shared configuration builders, servers and upstream doubles used by the
//! integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum_test::TestServer;
use bytes::Bytes;

use courier::{
    config::{Config, Features},
    error::AppResult,
    proxy::{
        deadline::Deadline,
        dispatch::{OutboundRequest, Upstream, UpstreamBody, UpstreamResponse},
    },
    routes::create_router,
    AppState,
};

/// Test configuration constants
pub mod constants {
    pub const SERVER_OPENAI_KEY: &str = "sk-server-openai";
    pub const SERVER_GOOGLE_KEY: &str = "server-google-key";
    pub const CALLER_KEY: &str = "sk-caller";
    pub const SEARCH_ENGINE_ID: &str = "engine-123";
}

/// Config with every upstream pointed at `upstream_uri` and server keys set
pub fn config_for(upstream_uri: &str) -> Config {
    Config {
        openai_api_key: Some(constants::SERVER_OPENAI_KEY.to_string()),
        openai_base_url: upstream_uri.to_string(),
        google_api_key: Some(constants::SERVER_GOOGLE_KEY.to_string()),
        google_url: upstream_uri.to_string(),
        google_search_url: upstream_uri.to_string(),
        google_search_engine_id: Some(constants::SEARCH_ENGINE_ID.to_string()),
        ..Config::default()
    }
}

/// Config without any server-side keys
pub fn keyless_config(upstream_uri: &str) -> Config {
    Config {
        openai_api_key: None,
        google_api_key: None,
        ..config_for(upstream_uri)
    }
}

pub fn with_features(config: Config, features: Features) -> Config {
    Config { features, ..config }
}

pub fn with_timeout(config: Config, timeout: Duration) -> Config {
    Config {
        upstream_timeout: timeout,
        ..config
    }
}

/// Test server backed by the real HTTP dispatcher
pub fn http_server(config: Config) -> TestServer {
    let state = AppState::new(config).expect("Failed to create app state");
    TestServer::new(create_router(Arc::new(state))).expect("Failed to create test server")
}

/// Test server backed by a test double
pub fn server_with_upstream(config: Config, upstream: Arc<dyn Upstream>) -> TestServer {
    let state = AppState::with_upstream(config, upstream);
    TestServer::new(create_router(Arc::new(state))).expect("Failed to create test server")
}

type Responder = Box<dyn Fn(&OutboundRequest) -> UpstreamResponse + Send + Sync>;

/// Upstream double that records every outbound call
pub struct ScriptedUpstream {
    calls: AtomicUsize,
    last: Mutex<Option<OutboundRequest>>,
    respond: Responder,
}

impl ScriptedUpstream {
    pub fn new(
        respond: impl Fn(&OutboundRequest) -> UpstreamResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
            respond: Box::new(respond),
        })
    }

    /// Spy answering every call with `200 {}`
    pub fn ok() -> Arc<Self> {
        Self::new(|_| json_response(StatusCode::OK, "{}"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<OutboundRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn dispatch(
        &self,
        request: OutboundRequest,
        _deadline: &Deadline,
    ) -> AppResult<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = (self.respond)(&request);
        *self.last.lock().unwrap() = Some(request);
        Ok(response)
    }
}

pub fn json_response(status: StatusCode, body: &'static str) -> UpstreamResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Full(Bytes::from_static(body.as_bytes())),
    }
}

/// Event-stream response delivered in exactly the given chunks
pub fn event_stream_response(chunks: Vec<&'static str>) -> UpstreamResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    let items: Vec<Result<Bytes, std::io::Error>> = chunks
        .into_iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    UpstreamResponse {
        status: StatusCode::OK,
        headers,
        body: UpstreamBody::Stream(Box::pin(futures::stream::iter(items))),
    }
}
