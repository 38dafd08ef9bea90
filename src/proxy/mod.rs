//! Proxy module
//!
//! Routing, request rewriting and dispatch of forwarded calls.

pub mod context;
pub mod deadline;
pub mod dispatch;
pub mod headers;
pub mod rewrite;
pub mod route;

pub use context::RequestContext;
pub use deadline::{Deadline, DeadlineGuard};
pub use dispatch::{HttpUpstream, OutboundRequest, Upstream, UpstreamBody, UpstreamResponse};
pub use rewrite::{RequestPlan, RequestRewriter};
pub use route::{ProviderId, ProviderRouter, RouteMatch};
