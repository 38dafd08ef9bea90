//! Request rewriter
//!
//! Builds the outbound request for a routed call: target URL and query,
//! provider auth headers, and the (possibly mutated) body. Body mutation is
//! best effort. A body that is not a JSON object is forwarded as received.

use std::sync::Arc;

use axum::http::Method;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    middleware::auth::Credential,
    pipeline::{
        citations::{sources_from_request, SearchSource},
        ResponseHints,
    },
    proxy::{
        context::RequestContext,
        dispatch::OutboundRequest,
        headers::{binary_content_type, build_outbound_headers},
        route::{EndpointKind, ProviderId, RouteMatch},
    },
};

/// System instruction asking the model to cite its sources as markdown links
pub const CITATION_INSTRUCTION: &str = "When you use information from search results, \
cite each source inline as a markdown link in the form [title](url). \
Only cite URLs that appear in the search results.";

/// Query parameter that must never reach an upstream
const KEY_QUERY_PARAM: &str = "key";

/// Outbound call plus what the response pipeline needs to know about it
#[derive(Debug)]
pub struct RequestPlan {
    pub outbound: OutboundRequest,
    pub hints: ResponseHints,
}

/// Result of body rewriting
#[derive(Debug, Default)]
struct BodyPlan {
    body: Option<Bytes>,
    stream_flag: bool,
    search_tool_injected: bool,
    citation_sources: Vec<SearchSource>,
}

pub struct RequestRewriter {
    config: Arc<Config>,
}

impl RequestRewriter {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Build the outbound request for an authenticated, routed call
    pub fn rewrite(
        &self,
        ctx: &RequestContext,
        matched: &RouteMatch,
        credential: &Credential,
    ) -> AppResult<RequestPlan> {
        let provider = matched.route.provider;
        let url = self.build_url(ctx, matched)?;
        let headers = build_outbound_headers(
            provider,
            &credential.key,
            &ctx.headers,
            self.config.openai_org_id.as_deref(),
        )?;
        let body = self.build_body(ctx, matched);

        let hints = ResponseHints {
            provider,
            streaming_requested: ctx.wants_sse()
                || body.stream_flag
                || matched.endpoint.kind == EndpointKind::StreamGenerate,
            listing: matched.endpoint.kind == EndpointKind::Listing,
            search_tool_injected: body.search_tool_injected,
            citation_sources: body.citation_sources,
        };

        Ok(RequestPlan {
            outbound: OutboundRequest {
                method: ctx.method.clone(),
                url,
                headers,
                body: body.body,
            },
            hints,
        })
    }

    fn build_url(&self, ctx: &RequestContext, matched: &RouteMatch) -> AppResult<String> {
        let mut url = reqwest::Url::parse(&matched.upstream_url()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Invalid upstream URL for {}: {}",
                matched.route.provider.name(),
                e
            ))
        })?;

        let mut pairs: Vec<(&str, &str)> = ctx
            .query
            .iter()
            .filter(|(k, _)| k != KEY_QUERY_PARAM)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        if matched.route.provider == ProviderId::Search {
            let has_query = ctx
                .query_param("q")
                .map(|q| !q.trim().is_empty())
                .unwrap_or(false);
            if !has_query {
                return Err(AppError::BadRequest(
                    "Missing required query parameter: q".to_string(),
                ));
            }
            let engine = self.config.google_search_engine_id.as_deref().ok_or_else(|| {
                AppError::ServiceUnavailable("Search engine id is not configured".to_string())
            })?;
            pairs.retain(|(k, _)| *k != "cx");
            pairs.push(("cx", engine));
        }

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }

    fn build_body(&self, ctx: &RequestContext, matched: &RouteMatch) -> BodyPlan {
        let requires_body = matched.endpoint.requires_body && ctx.method == Method::POST;

        if ctx.body.is_empty() {
            return BodyPlan {
                body: requires_body.then(|| Bytes::from_static(b"{}")),
                ..BodyPlan::default()
            };
        }

        if binary_content_type(&ctx.headers).is_some() {
            return BodyPlan {
                body: Some(ctx.body.clone()),
                ..BodyPlan::default()
            };
        }

        let mut value = match serde_json::from_slice::<Value>(&ctx.body) {
            Ok(Value::Object(map)) => map,
            _ => {
                debug!(
                    trace_id = %ctx.trace_id,
                    "Request body is not a JSON object, forwarding as-is"
                );
                return BodyPlan {
                    body: Some(ctx.body.clone()),
                    ..BodyPlan::default()
                };
            }
        };

        let mut plan = BodyPlan {
            stream_flag: value.get("stream").and_then(Value::as_bool).unwrap_or(false),
            ..BodyPlan::default()
        };
        let mut changed = false;

        if let Some(results) = value.remove("search_results") {
            plan.citation_sources = sources_from_request(&json!({ "search_results": results }));
            changed = true;
        }

        if matched.endpoint.is_generative() {
            let provider = matched.route.provider;
            let features = &self.config.features;

            if features.search_tools && inject_search_tool(provider, &mut value) {
                plan.search_tool_injected = true;
                changed = true;
            }
            if features.citation_prompt && inject_citation_instruction(provider, &mut value) {
                changed = true;
            }
        }

        plan.body = Some(if changed {
            match serde_json::to_vec(&value) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => ctx.body.clone(),
            }
        } else {
            ctx.body.clone()
        });
        plan
    }
}

fn has_tools(body: &Map<String, Value>) -> bool {
    body.get("tools")
        .and_then(Value::as_array)
        .map(|tools| !tools.is_empty())
        .unwrap_or(false)
}

/// Add the provider's default search tool unless tools are already declared
pub fn inject_search_tool(provider: ProviderId, body: &mut Map<String, Value>) -> bool {
    if has_tools(body) {
        return false;
    }
    match provider {
        ProviderId::OpenAi => {
            if body.contains_key("web_search_options") {
                return false;
            }
            body.insert("web_search_options".to_string(), json!({}));
            true
        }
        ProviderId::Gemini => {
            body.insert("tools".to_string(), json!([{ "google_search": {} }]));
            true
        }
        ProviderId::Search => false,
    }
}

/// Add the citation instruction to the system prompt, prepending to any
/// existing one
pub fn inject_citation_instruction(provider: ProviderId, body: &mut Map<String, Value>) -> bool {
    match provider {
        ProviderId::OpenAi => {
            let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
                return false;
            };
            let system = messages
                .iter_mut()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("system"));

            match system {
                Some(message) => match message.get_mut("content") {
                    Some(Value::String(content)) => prepend_instruction(content),
                    Some(Value::Array(parts)) => {
                        parts.insert(0, json!({ "type": "text", "text": CITATION_INSTRUCTION }));
                        true
                    }
                    _ => {
                        message["content"] = json!(CITATION_INSTRUCTION);
                        true
                    }
                },
                None => {
                    let system = json!({ "role": "system", "content": CITATION_INSTRUCTION });
                    messages.insert(0, system);
                    true
                }
            }
        }
        ProviderId::Gemini => {
            let instruction = body
                .entry("systemInstruction")
                .or_insert_with(|| json!({ "parts": [] }));
            if !instruction.is_object() {
                *instruction = json!({ "parts": [] });
            }
            if !instruction.get("parts").map(Value::is_array).unwrap_or(false) {
                instruction["parts"] = json!([]);
            }
            let Some(parts) = instruction.get_mut("parts").and_then(Value::as_array_mut) else {
                return false;
            };

            match parts.first_mut().and_then(|p| p.get_mut("text")) {
                Some(Value::String(text)) => prepend_instruction(text),
                _ => {
                    parts.insert(0, json!({ "text": CITATION_INSTRUCTION }));
                    true
                }
            }
        }
        ProviderId::Search => false,
    }
}

fn prepend_instruction(content: &mut String) -> bool {
    if content.starts_with(CITATION_INSTRUCTION) {
        return false;
    }
    *content = if content.is_empty() {
        CITATION_INSTRUCTION.to_string()
    } else {
        format!("{}\n\n{}", CITATION_INSTRUCTION, content)
    };
    true
}
