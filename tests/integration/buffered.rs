//! Buffered response tests against a wiremock upstream

use std::time::Duration;

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::{
    matchers::{body_json, header as header_is, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::{config_for, constants, http_server, with_features, with_timeout};
use courier::config::Features;

#[tokio::test]
async fn test_restricted_models_are_filtered() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header_is(
            "authorization",
            format!("Bearer {}", constants::SERVER_OPENAI_KEY).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-4-x"}, {"id": "gpt-4o-mini"}, {"id": "gpt-3.5"}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let features = Features {
        disable_restricted_models: true,
        ..Features::default()
    };
    let server = http_server(with_features(config_for(&upstream.uri()), features));

    let response = server.get("/api/openai/v1/models").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({"object": "list", "data": [{"id": "gpt-4o-mini"}, {"id": "gpt-3.5"}]})
    );
}

#[tokio::test]
async fn test_untransformed_body_round_trips_byte_for_byte() {
    let raw = "{\n  \"id\": \"chatcmpl-1\",\n  \"choices\": [ {\"message\": {\"content\": \"see https://example.com/ ok\"}} ]\n}";

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(raw.as_bytes().to_vec(), "application/json")
                .insert_header("www-authenticate", "Bearer realm=\"upstream\"")
                .insert_header("x-request-id", "req-42"),
        )
        .mount(&upstream)
        .await;

    let server = http_server(config_for(&upstream.uri()));
    let response = server
        .post("/api/openai/v1/chat/completions")
        .json(&json!({"model": "gpt-3.5", "messages": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), raw);
    assert_eq!(response.header("x-accel-buffering"), "no");
    assert_eq!(response.header("x-request-id"), "req-42");
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
}

#[tokio::test]
async fn test_upstream_error_status_and_body_pass_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .mount(&upstream)
        .await;

    let server = http_server(config_for(&upstream.uri()));
    let response = server
        .post("/api/openai/v1/chat/completions")
        .json(&json!({"messages": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.json::<Value>(),
        json!({"error": {"message": "Rate limit reached", "type": "requests"}})
    );
}

#[tokio::test]
async fn test_redirect_is_surfaced_not_followed() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dashboard/billing/usage"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "https://elsewhere.invalid/steal"),
        )
        .mount(&upstream)
        .await;

    let server = http_server(config_for(&upstream.uri()));
    let response = server.get("/api/openai/dashboard/billing/usage").await;

    assert_eq!(response.status_code(), StatusCode::FOUND);
    assert_eq!(response.header("location"), "https://elsewhere.invalid/steal");
}

#[tokio::test]
async fn test_slow_upstream_times_out_with_gateway_timeout() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&upstream)
        .await;

    let config = with_timeout(config_for(&upstream.uri()), Duration::from_millis(200));
    let server = http_server(config);
    let response = server
        .post("/api/google/v1beta/models/gemini-pro:generateContent")
        .json(&json!({"contents": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["error"], true);
}

#[tokio::test]
async fn test_search_tool_and_citations_for_gemini() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .and(body_json(json!({
            "contents": [{"parts": [{"text": "What is Rust?"}]}],
            "tools": [{"google_search": {}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "A language [citation:0]. Also [citation:4]."}]},
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://www.rust-lang.org", "title": "Rust"}}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let features = Features {
        search_tools: true,
        ..Features::default()
    };
    let server = http_server(with_features(config_for(&upstream.uri()), features));

    let response = server
        .post("/api/google/v1beta/models/gemini-pro:generateContent")
        .json(&json!({"contents": [{"parts": [{"text": "What is Rust?"}]}]}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(
        body["candidates"][0]["content"]["parts"][0]["text"],
        "A language [Rust](https://www.rust-lang.org). Also [citation:4]."
    );
}

#[tokio::test]
async fn test_empty_upstream_body_returns_empty_response() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dashboard/billing/subscription"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&upstream)
        .await;

    let server = http_server(config_for(&upstream.uri()));
    let response = server.get("/api/openai/dashboard/billing/subscription").await;

    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    assert!(response.text().is_empty());
    assert_eq!(response.header("x-accel-buffering"), "no");
}
