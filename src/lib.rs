//! Courier - allow-listed AI provider gateway
//!
//! This library provides the core of the Courier gateway. It authenticates
//! inbound calls, forwards them to OpenAI-compatible, Gemini or Google Custom
//! Search upstreams, and transforms responses in buffered or streaming mode.

pub mod config;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod proxy;
pub mod routes;
pub mod streaming;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::config::Config;
pub use crate::proxy::{HttpUpstream, Upstream};

/// Application state shared across all request handlers
pub struct AppState {
    /// Read-only configuration snapshot
    pub config: Arc<Config>,
    /// Dispatcher for outbound calls
    pub upstream: Arc<dyn Upstream>,
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state backed by the HTTP dispatcher
    pub fn new(config: Config) -> Result<Self> {
        let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new()?);
        Ok(Self::with_upstream(config, upstream))
    }

    /// Create application state with a custom dispatcher
    pub fn with_upstream(config: Config, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            config: Arc::new(config),
            upstream,
            start_time: Instant::now(),
        }
    }
}
