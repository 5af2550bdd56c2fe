//! API integration tests.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{next_frame, next_frame_within, test_app, test_dev_app};

const GREETING: &str = "event: connection_established\ndata: Connected\n\n";

const UPDATE: &str = r#"{
    "update_id": 900,
    "message": {
        "message_id": 7,
        "chat": {"id": 42, "type": "private", "first_name": "Alice"},
        "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
        "date": 1700000000,
        "text": "hello"
    }
}"#;

async fn post_json(app: &Router, uri: &str, body: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Open a push channel and consume its greeting.
async fn open_channel(app: &Router, connection_id: &str) -> Body {
    let response = get(app, &format!("/api/events?connectionId={connection_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    assert_eq!(next_frame(&mut body).await.as_deref(), Some(GREETING));
    body
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _hub) = test_app();
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["connections"], 0);
}

#[tokio::test]
async fn test_webhook_get_acknowledges() {
    let (app, _hub) = test_app();
    for uri in ["/api/webhook", "/api/webhook/", "/api/webhook/123"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(
            json_body(response).await,
            json!({"success": true, "status": "ok"})
        );
    }
}

#[tokio::test]
async fn test_webhook_broadcasts_message() {
    let (app, _hub) = test_app();
    let mut channel = open_channel(&app, "tab-1").await;

    let response = post_json(&app, "/api/webhook/555", UPDATE).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"success": true}));

    let frame = next_frame(&mut channel).await.unwrap();
    let payload = frame
        .strip_prefix("data: ")
        .and_then(|f| f.strip_suffix("\n\n"))
        .unwrap();
    let event: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(event["type"], "NEW_MESSAGE");
    assert_eq!(event["payload"]["tokenId"], "555");
    assert_eq!(event["payload"]["message"]["sourceTokenId"], "555");
    assert_eq!(event["payload"]["message"]["text"], "hello");
}

#[tokio::test]
async fn test_webhook_missing_token_is_rejected() {
    let (app, _hub) = test_app();
    let mut channel = open_channel(&app, "tab-1").await;

    for uri in ["/api/webhook", "/api/webhook/", "/api/webhook/%20"] {
        let response = post_json(&app, uri, UPDATE).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
    }

    assert!(
        next_frame_within(&mut channel, Duration::from_millis(100))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_webhook_unparseable_body() {
    let (app, _hub) = test_app();
    let mut channel = open_channel(&app, "tab-1").await;

    let response = post_json(&app, "/api/webhook/555", "{not json").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());

    assert!(
        next_frame_within(&mut channel, Duration::from_millis(100))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_webhook_without_message_is_acknowledged() {
    let (app, _hub) = test_app();
    let mut channel = open_channel(&app, "tab-1").await;

    let response = post_json(
        &app,
        "/api/webhook/555",
        r#"{"update_id": 1, "callback_query": {"id": "q", "data": "x"}}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"success": true}));

    assert!(
        next_frame_within(&mut channel, Duration::from_millis(100))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_events_headers_and_registration() {
    let (app, hub) = test_app();
    let response = get(&app, "/api/events?connectionId=abc").await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(hub.is_connected("abc"));

    let mut body = response.into_body();
    assert_eq!(next_frame(&mut body).await.as_deref(), Some(GREETING));

    hub.heartbeat();
    assert_eq!(next_frame(&mut body).await.as_deref(), Some(": keepalive\n\n"));

    drop(body);
    assert!(!hub.is_connected("abc"));
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_events_generates_connection_id() {
    let (app, hub) = test_app();
    let response = get(&app, "/api/events").await;
    assert_eq!(response.status(), StatusCode::OK);

    let ids = hub.connection_ids();
    assert_eq!(ids.len(), 1);
    assert!(uuid::Uuid::parse_str(&ids[0]).is_ok());
}

#[tokio::test]
async fn test_each_channel_receives_one_data_frame() {
    let (app, hub) = test_app();
    let mut channels = Vec::new();
    for id in ["a", "b", "c"] {
        channels.push(open_channel(&app, id).await);
    }
    assert_eq!(hub.connection_count(), 3);

    let response = post_json(&app, "/api/webhook/555", UPDATE).await;
    assert_eq!(response.status(), StatusCode::OK);

    for channel in channels.iter_mut() {
        let frame = next_frame(channel).await.unwrap();
        assert!(frame.starts_with("data: "));
        assert!(
            next_frame_within(channel, Duration::from_millis(50))
                .await
                .is_none()
        );
    }
}

#[tokio::test]
async fn test_reconnect_with_same_id_replaces_stream() {
    let (app, hub) = test_app();
    let mut first = open_channel(&app, "tab").await;
    let mut second = open_channel(&app, "tab").await;
    assert_eq!(hub.connection_count(), 1);

    // The replaced stream has lost its sender and ends.
    assert!(next_frame(&mut first).await.is_none());
    drop(first);
    assert!(hub.is_connected("tab"));

    post_json(&app, "/api/webhook/555", UPDATE).await;
    assert!(next_frame(&mut second).await.unwrap().starts_with("data: "));
}

#[tokio::test]
async fn test_harness_requires_dev_mode() {
    let (app, _hub) = test_app();
    let response = post_json(&app, "/test/event", r#"{"update": {"kind": "ping"}}"#).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["success"], false);
}

#[tokio::test]
async fn test_harness_broadcasts_generic_update() {
    let (app, _hub) = test_dev_app();
    let mut channel = open_channel(&app, "tab").await;

    let response = post_json(
        &app,
        "/test/event",
        r#"{"tokenId": "555", "update": {"kind": "ping"}}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["delivered"], 1);
    assert_eq!(json["failed"], 0);

    let frame = next_frame(&mut channel).await.unwrap();
    assert!(frame.contains(r#""type":"GENERIC_UPDATE""#));
    assert!(frame.contains(r#""kind":"ping""#));
}
