//! Provider routing
//!
//! Maps an inbound `/api/<provider>/<sub-path>` to an upstream provider.
//! Only enumerated sub-paths are ever forwarded; everything else is rejected.

use std::sync::Arc;

use axum::http::HeaderName;

use crate::{
    config::Config,
    error::{AppError, AppResult},
};

/// Inbound prefix shared by every provider route
pub const API_PREFIX: &str = "/api/";

/// Provider-specific inbound key header for OpenAI-compatible calls
pub const OPENAI_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
/// Provider-specific key header for Google APIs (inbound and outbound)
pub const GOOGLE_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

/// Upstream provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenAi,
    Gemini,
    Search,
}

impl ProviderId {
    /// Resolve the provider discriminator segment of an inbound path
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "openai" => Some(Self::OpenAi),
            "google" => Some(Self::Gemini),
            "search" => Some(Self::Search),
            _ => None,
        }
    }

    /// Resolve the provider from a full inbound path
    pub fn from_path(path: &str) -> AppResult<Self> {
        path.strip_prefix(API_PREFIX)
            .and_then(|rest| rest.split('/').next())
            .and_then(Self::from_segment)
            .ok_or_else(|| AppError::Forbidden(path.to_string()))
    }

    /// Name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "google",
            Self::Search => "search",
        }
    }

    /// Header a caller may use to present a provider key
    pub fn key_header(&self) -> HeaderName {
        match self {
            Self::OpenAi => OPENAI_KEY_HEADER,
            Self::Gemini | Self::Search => GOOGLE_KEY_HEADER,
        }
    }

    /// Enumerated sub-paths this provider forwards
    pub fn endpoints(&self) -> &'static [Endpoint] {
        match self {
            Self::OpenAi => OPENAI_ENDPOINTS,
            Self::Gemini => GEMINI_ENDPOINTS,
            Self::Search => SEARCH_ENDPOINTS,
        }
    }

    /// Server-side key configured for this provider
    pub fn server_key<'a>(&self, config: &'a Config) -> Option<&'a str> {
        match self {
            Self::OpenAi => config.openai_api_key.as_deref(),
            Self::Gemini | Self::Search => config.google_api_key.as_deref(),
        }
    }

    fn base_url<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            Self::OpenAi => &config.openai_base_url,
            Self::Gemini => &config.google_url,
            Self::Search => &config.google_search_url,
        }
    }
}

/// What a matched endpoint does, which decides body and response handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Text generation answered as a single document
    Generate,
    /// Text generation answered incrementally
    StreamGenerate,
    /// Model listing, always answered in buffered mode
    Listing,
    /// Forwarded without body mutation
    Passthrough,
}

/// One allow-listed sub-path
///
/// `*` in a pattern matches exactly one non-empty path segment fragment.
#[derive(Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub pattern: &'static str,
    pub kind: EndpointKind,
    /// POST calls without a body are sent `{}`
    pub requires_body: bool,
}

const fn endpoint(pattern: &'static str, kind: EndpointKind, requires_body: bool) -> Endpoint {
    Endpoint {
        pattern,
        kind,
        requires_body,
    }
}

use EndpointKind::{Generate, Listing, Passthrough, StreamGenerate};

const OPENAI_ENDPOINTS: &[Endpoint] = &[
    endpoint("v1/chat/completions", Generate, true),
    endpoint("v1/completions", Passthrough, true),
    endpoint("v1/embeddings", Passthrough, true),
    endpoint("v1/models", Listing, false),
    endpoint("dashboard/billing/usage", Passthrough, false),
    endpoint("dashboard/billing/subscription", Passthrough, false),
];

const GEMINI_ENDPOINTS: &[Endpoint] = &[
    endpoint("v1beta/models", Listing, false),
    endpoint("v1beta/models/*:generateContent", Generate, true),
    endpoint("v1beta/models/*:streamGenerateContent", StreamGenerate, true),
    endpoint("v1beta/models/*:countTokens", Passthrough, true),
];

const SEARCH_ENDPOINTS: &[Endpoint] = &[endpoint("customsearch/v1", Passthrough, false)];

impl Endpoint {
    /// Whether the endpoint generates model output
    pub fn is_generative(&self) -> bool {
        matches!(self.kind, Generate | StreamGenerate)
    }

    /// Check whether a sub-path (no leading slash) matches this endpoint
    pub fn matches(&self, sub_path: &str) -> bool {
        let pattern: Vec<&str> = self.pattern.split('/').collect();
        let path: Vec<&str> = sub_path.split('/').collect();

        pattern.len() == path.len()
            && pattern
                .iter()
                .zip(&path)
                .all(|(p, s)| segment_matches(p, s))
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == segment,
        Some((prefix, suffix)) => {
            segment.len() > prefix.len() + suffix.len()
                && segment.starts_with(prefix)
                && segment.ends_with(suffix)
                && !segment[prefix.len()..].starts_with('.')
        }
    }
}

/// Immutable description of one provider's upstream
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub provider: ProviderId,
    /// Normalized base URL: scheme present, no trailing slash
    pub base_url: String,
    /// Inbound prefix stripped before building the upstream path
    pub strip_prefix: String,
    pub allowed: &'static [Endpoint],
}

/// A resolved call: route, matched endpoint and upstream sub-path
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: ProviderRoute,
    pub endpoint: &'static Endpoint,
    pub sub_path: String,
}

impl RouteMatch {
    /// Upstream URL without query string
    pub fn upstream_url(&self) -> String {
        format!("{}/{}", self.route.base_url, self.sub_path)
    }
}

/// Allow-list router over the configured providers
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    config: Arc<Config>,
}

impl ProviderRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Build the route description for a provider
    pub fn provider_route(&self, provider: ProviderId) -> ProviderRoute {
        ProviderRoute {
            provider,
            base_url: normalize_base_url(provider.base_url(&self.config)),
            strip_prefix: format!("{}{}/", API_PREFIX, provider.name()),
            allowed: provider.endpoints(),
        }
    }

    /// Resolve an inbound path, rejecting anything not allow-listed
    pub fn route(&self, path: &str) -> AppResult<RouteMatch> {
        let provider = ProviderId::from_path(path)?;
        let route = self.provider_route(provider);

        let sub_path = path
            .strip_prefix(route.strip_prefix.as_str())
            .ok_or_else(|| AppError::Forbidden(path.to_string()))?;

        let endpoint = route
            .allowed
            .iter()
            .find(|e| e.matches(sub_path))
            .ok_or_else(|| AppError::Forbidden(path.to_string()))?;

        Ok(RouteMatch {
            sub_path: sub_path.to_string(),
            endpoint,
            route,
        })
    }
}

/// Ensure an `http(s)://` scheme and strip trailing slashes
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
