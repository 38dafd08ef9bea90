//! Configuration management for Courier
//!
//! Configuration is loaded once from environment variables and is read-only
//! afterwards. Request handling only ever sees it through `Arc<Config>`.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Default upstream deadline for a single forwarded call
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 600;

/// Feature toggles that change request or response bodies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    /// Remove restricted model families from model-list responses
    pub disable_restricted_models: bool,
    /// Inject a default search tool when the request declares none
    pub search_tools: bool,
    /// Inject a system instruction asking for `[title](url)` citations
    pub citation_prompt: bool,
    /// Rewrite bare URLs into markdown links in streamed output
    pub link_formatting: bool,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Server-side OpenAI key, used when the caller brings none
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible upstream base URL
    pub openai_base_url: String,
    /// Organization forwarded as `OpenAI-Organization`
    pub openai_org_id: Option<String>,

    /// Server-side Google key (Gemini and Custom Search)
    pub google_api_key: Option<String>,
    /// Gemini upstream base URL
    pub google_url: String,
    /// Google Custom Search upstream base URL
    pub google_search_url: String,
    /// Programmable search engine id, sent upstream as `cx`
    pub google_search_engine_id: Option<String>,

    /// Access codes that unlock the server-side keys
    pub access_codes: Vec<String>,

    /// Deadline applied to every upstream call
    pub upstream_timeout: Duration,

    pub features: Features,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| {
            optional(key)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };

        Ok(Self {
            host: optional("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: optional("COURIER_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid COURIER_PORT")?,

            openai_api_key: optional("OPENAI_API_KEY"),
            openai_base_url: optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            openai_org_id: optional("OPENAI_ORG_ID"),

            google_api_key: optional("GOOGLE_API_KEY"),
            google_url: optional("GOOGLE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            google_search_url: optional("GOOGLE_SEARCH_URL")
                .unwrap_or_else(|| "https://www.googleapis.com".to_string()),
            google_search_engine_id: optional("GOOGLE_SEARCH_ENGINE_ID"),

            access_codes: optional("ACCESS_CODES")
                .map(|codes| {
                    codes
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            upstream_timeout: Duration::from_secs(
                optional("UPSTREAM_TIMEOUT_SECONDS")
                    .map(|v| v.parse().context("Invalid UPSTREAM_TIMEOUT_SECONDS"))
                    .transpose()?
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            ),

            features: Features {
                disable_restricted_models: flag("DISABLE_RESTRICTED_MODELS"),
                search_tools: flag("ENABLE_SEARCH_TOOLS"),
                citation_prompt: flag("ENABLE_CITATION_PROMPT"),
                link_formatting: flag("ENABLE_LINK_FORMATTING"),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".to_string(),
            openai_org_id: None,
            google_api_key: None,
            google_url: "https://generativelanguage.googleapis.com".to_string(),
            google_search_url: "https://www.googleapis.com".to_string(),
            google_search_engine_id: None,
            access_codes: Vec::new(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            features: Features::default(),
        }
    }
}
