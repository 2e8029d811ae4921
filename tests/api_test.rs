mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::*;
use real_analyst::agents::hosting::ScriptedReply;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn upload(app: &Router, uri: &str, bytes: &'static [u8]) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/octet-stream")
        .body(Body::from(bytes))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_and_agents() {
    let h = harness().await;
    let app = real_analyst::api::create_app(h.service.clone());

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["primary_agent"], PRIMARY);

    let (status, body) = call(&app, "GET", "/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_thread_endpoints() {
    let h = harness().await;
    let app = real_analyst::api::create_app(h.service.clone());

    let (status, body) = call(&app, "POST", "/threads", Some(json!({"name": "deal-123"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "deal-123");

    let (status, body) = call(&app, "POST", "/threads", Some(json!({"name": "deal-123"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    // no body picks the next generated name
    let (status, body) = call(&app, "POST", "/threads", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "thread-2");

    let (_, body) = call(&app, "GET", "/threads", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = call(&app, "DELETE", "/threads/deal-123", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "DELETE", "/threads/deal-123", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "DELETE", "/threads", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 1);
}

#[tokio::test]
async fn test_message_and_history() {
    let h = harness().await;
    let app = real_analyst::api::create_app(h.service.clone());
    h.host
        .script(
            PRIMARY,
            [
                ScriptedReply::tool_call("zoning_advisor", json!({"query": "R-2 rules"})),
                ScriptedReply::text("R-2 allows duplexes."),
            ],
        )
        .await;

    call(&app, "POST", "/threads", Some(json!({"name": "deal-1"}))).await;
    let (status, body) = call(
        &app,
        "POST",
        "/threads/deal-1/messages",
        Some(json!({"text": "Can I build a duplex?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "R-2 allows duplexes.");

    let (status, body) = call(&app, "GET", "/threads/deal-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0]["content"], "Can I build a duplex?");

    let (status, body) = call(&app, "POST", "/threads/ghost/messages", Some(json!({"text": "hi"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_turn_limit_maps_to_unprocessable() {
    let h = harness().await;
    let app = real_analyst::api::create_app(h.service.clone());
    let loop_call = ScriptedReply::tool_call("valuation_expert", json!({"query": "again"}));
    h.host.script(PRIMARY, std::iter::repeat(loop_call).take(5)).await;

    call(&app, "POST", "/threads", Some(json!({"name": "deal-2"}))).await;
    let (status, body) = call(&app, "POST", "/threads/deal-2/messages", Some(json!({"text": "value it"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_document_upload() {
    let h = harness().await;
    let app = real_analyst::api::create_app(h.service.clone());

    let (status, _) = upload(&app, "/documents?file_name=report.exe", b"MZ").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, body) = upload(&app, "/documents?file_name=report.pdf", b"Parcel zoned R-2").await;
    assert_eq!(status, StatusCode::CREATED);
    let first = body["data"][0]["index_id"].clone();

    let (status, _) = upload(&app, "/documents?file_name=survey.pdf", b"Survey").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = upload(&app, "/documents?file_name=survey.pdf&replace=true", b"Survey").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body["data"][0]["index_id"], first);
}
