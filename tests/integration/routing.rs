//! Allow-list routing and credential gate tests
//!
//! Rejected calls must never reach the dispatcher.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use serde_json::{json, Value};

use crate::common::{config_for, constants, keyless_config, server_with_upstream, ScriptedUpstream};
use courier::config::Config;

fn bearer(key: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", key)).unwrap()
}

#[tokio::test]
async fn test_paths_outside_allow_list_are_forbidden_without_dispatch() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(config_for("http://upstream.invalid"), spy.clone());

    for path in [
        "/api/openai/v1/files",
        "/api/openai/v1/chat/completions/../../admin",
        "/api/google/v1/models",
        "/api/anthropic/v1/messages",
        "/v1/chat/completions",
    ] {
        let response = server.post(path).json(&json!({})).await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN, "{path}");

        let body: Value = response.json();
        assert_eq!(body["error"], true);
    }

    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn test_missing_credential_is_rejected_before_routing() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(keyless_config("http://upstream.invalid"), spy.clone());

    let response = server.post("/api/openai/v1/chat/completions").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // An empty bearer token is the same as no credential
    let response = server
        .post("/api/google/v1beta/models/gemini-pro:generateContent")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "))
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], true);

    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn test_caller_key_replaces_inbound_credentials() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(keyless_config("http://upstream.invalid"), spy.clone());

    let response = server
        .post("/api/openai/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(constants::CALLER_KEY))
        .add_header(header::COOKIE, HeaderValue::from_static("session=secret"))
        .json(&json!({"model": "gpt-3.5", "messages": []}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let outbound = spy.last_request().unwrap();
    assert_eq!(outbound.url, "http://upstream.invalid/v1/chat/completions");
    assert_eq!(
        outbound.headers.get(header::AUTHORIZATION).unwrap(),
        format!("Bearer {}", constants::CALLER_KEY).as_str()
    );
    assert_eq!(outbound.headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert!(outbound.headers.get(header::COOKIE).is_none());
}

#[tokio::test]
async fn test_google_key_header_and_server_fallback() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(config_for("http://upstream.invalid"), spy.clone());

    let response = server
        .post("/api/google/v1beta/models/gemini-pro:generateContent")
        .add_query_param("key", "leaked")
        .json(&json!({"contents": []}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let outbound = spy.last_request().unwrap();
    assert_eq!(
        outbound.headers.get(HeaderName::from_static("x-goog-api-key")).unwrap(),
        constants::SERVER_GOOGLE_KEY
    );
    assert!(!outbound.url.contains("leaked"));
    assert!(outbound.headers.get(header::AUTHORIZATION).is_none());
}

#[tokio::test]
async fn test_access_codes_unlock_server_key() {
    let config = Config {
        access_codes: vec!["letmein".to_string()],
        ..config_for("http://upstream.invalid")
    };
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(config, spy.clone());

    let denied = server.post("/api/openai/v1/chat/completions").json(&json!({})).await;
    assert_eq!(denied.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(spy.calls(), 0);

    let allowed = server
        .post("/api/openai/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer("letmein"))
        .json(&json!({}))
        .await;
    assert_eq!(allowed.status_code(), StatusCode::OK);

    let outbound = spy.last_request().unwrap();
    assert_eq!(
        outbound.headers.get(header::AUTHORIZATION).unwrap(),
        format!("Bearer {}", constants::SERVER_OPENAI_KEY).as_str()
    );
}

#[tokio::test]
async fn test_options_is_acknowledged_without_dispatch() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(keyless_config("http://upstream.invalid"), spy.clone());

    let response = server
        .method(axum::http::Method::OPTIONS, "/api/openai/v1/chat/completions")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"body": "OK"}));
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );

    // A browser preflight gets the same acknowledgement
    let response = server
        .method(axum::http::Method::OPTIONS, "/api/google/v1beta/models")
        .add_header(header::ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("GET"))
        .add_header(header::ORIGIN, HeaderValue::from_static("https://app.example"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"body": "OK"}));

    assert_eq!(spy.calls(), 0);
}

#[tokio::test]
async fn test_search_requires_query_parameter() {
    let spy = ScriptedUpstream::ok();
    let server = server_with_upstream(config_for("http://upstream.invalid"), spy.clone());

    let response = server.get("/api/search/customsearch/v1").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(spy.calls(), 0);

    let response = server
        .get("/api/search/customsearch/v1")
        .add_query_param("q", "rust async")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let outbound = spy.last_request().unwrap();
    assert!(outbound.url.contains("q=rust+async"));
    assert!(outbound.url.contains(&format!("cx={}", constants::SEARCH_ENGINE_ID)));
}
