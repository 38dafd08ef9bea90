//! Streaming relay tests

use axum::http::{header, StatusCode};
use serde_json::json;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::common::{
    config_for, event_stream_response, http_server, server_with_upstream, with_features,
    ScriptedUpstream,
};
use courier::config::Features;

fn link_formatting() -> Features {
    Features {
        link_formatting: true,
        ..Features::default()
    }
}

#[tokio::test]
async fn test_sse_stream_rewrites_complete_urls() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"text\":\"docs at https://doc.rust-lang.org/book/ today\"}\n\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = http_server(with_features(config_for(&upstream.uri()), link_formatting()));
    let response = server
        .post("/api/google/v1beta/models/gemini-pro:streamGenerateContent")
        .add_query_param("alt", "sse")
        .json(&json!({"contents": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "text/event-stream");
    assert_eq!(response.header("x-accel-buffering"), "no");
    assert_eq!(
        response.text(),
        "data: {\"text\":\"docs at [https://doc.rust-lang.org/book/](https://doc.rust-lang.org/book/) today\"}\n\n"
    );
}

#[tokio::test]
async fn test_url_split_across_chunks_is_left_alone() {
    let spy = ScriptedUpstream::new(|_| {
        event_stream_response(vec![
            "data: {\"text\":\"see https://exa",
            "mple.com/page and https://rust-lang.org now\"}\n\n",
        ])
    });
    let server = server_with_upstream(
        with_features(config_for("http://upstream.invalid"), link_formatting()),
        spy.clone(),
    );

    let response = server
        .post("/api/openai/v1/chat/completions")
        .json(&json!({"stream": true, "messages": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.text(),
        "data: {\"text\":\"see https://example.com/page and [https://rust-lang.org](https://rust-lang.org) now\"}\n\n"
    );
    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn test_stream_without_transforms_is_unaltered() {
    let spy = ScriptedUpstream::new(|_| {
        event_stream_response(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"https://a.example/ x\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
    });
    let server = server_with_upstream(config_for("http://upstream.invalid"), spy);

    let response = server
        .post("/api/openai/v1/chat/completions")
        .json(&json!({"stream": true, "messages": []}))
        .await;

    assert_eq!(
        response.text(),
        "data: {\"choices\":[{\"delta\":{\"content\":\"https://a.example/ x\"}}]}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_stream_substitutes_placeholders_from_request_results() {
    let spy = ScriptedUpstream::new(|_| {
        event_stream_response(vec!["data: {\"text\":\"per [citation:0]\"}\n\n"])
    });
    let server = server_with_upstream(config_for("http://upstream.invalid"), spy.clone());

    let response = server
        .post("/api/google/v1beta/models/gemini-pro:streamGenerateContent")
        .add_query_param("alt", "sse")
        .json(&json!({
            "contents": [],
            "search_results": [{"title": "Rust Book", "link": "https://doc.rust-lang.org/book/"}]
        }))
        .await;

    assert_eq!(
        response.text(),
        "data: {\"text\":\"per [Rust Book](https://doc.rust-lang.org/book/)\"}\n\n"
    );

    let outbound = spy.last_request().unwrap();
    let sent: serde_json::Value = serde_json::from_slice(outbound.body.as_ref().unwrap()).unwrap();
    assert_eq!(sent, json!({"contents": []}));
}
