//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use tgdash::api::{self, AppState};
use tgdash::config::ServerConfig;
use tgdash::hub::BroadcastHub;

/// Token accepted by the fake Bot API.
pub const TEST_TOKEN: &str = "123456:TESTTOKEN";

/// Create a test application around a fresh hub.
pub fn test_app() -> (Router, Arc<BroadcastHub>) {
    app_with(ServerConfig::default())
}

/// Same as [`test_app`] with the development endpoints enabled.
pub fn test_dev_app() -> (Router, Arc<BroadcastHub>) {
    app_with(ServerConfig {
        dev_mode: true,
        ..ServerConfig::default()
    })
}

fn app_with(server: ServerConfig) -> (Router, Arc<BroadcastHub>) {
    let hub = Arc::new(BroadcastHub::new());
    let router = api::create_router(AppState::new(hub.clone(), &server));
    (router, hub)
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

/// Next frame of a streaming body as text, or `None` if the stream ended
/// or stayed silent for `wait`.
pub async fn next_frame_within(body: &mut Body, wait: Duration) -> Option<String> {
    match tokio::time::timeout(wait, body.frame()).await {
        Ok(Some(Ok(frame))) => frame
            .into_data()
            .ok()
            .map(|data| String::from_utf8_lossy(&data).into_owned()),
        _ => None,
    }
}

pub async fn next_frame(body: &mut Body) -> Option<String> {
    next_frame_within(body, Duration::from_secs(2)).await
}

/// Minimal in-process stand-in for the Telegram Bot API.
#[derive(Clone, Default)]
pub struct FakeTelegram {
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
    pub updates: Arc<Mutex<Vec<Value>>>,
    pub webhook_url: Arc<Mutex<Option<String>>>,
    next_message_id: Arc<Mutex<i64>>,
}

impl FakeTelegram {
    /// Start the fake API and return it with its base URL.
    pub async fn start() -> (Self, String) {
        let fake = Self::default();
        let router = Router::new()
            .route("/{bot}/{method}", post(fake_method))
            .with_state(fake.clone());
        let base_url = spawn_server(router).await;
        (fake, base_url)
    }

    /// Queue an update for `getUpdates`.
    pub fn push_update(&self, update: Value) {
        self.updates.lock().unwrap().push(update);
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }
}

fn ok(result: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "ok": true, "result": result })))
}

fn fail(status: StatusCode, description: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "ok": false,
            "error_code": status.as_u16(),
            "description": description,
        })),
    )
}

fn chat_json(chat_id: &Value) -> Value {
    match chat_id {
        Value::String(name) => json!({
            "id": -100999,
            "type": "channel",
            "username": name.trim_start_matches('@'),
        }),
        other => json!({ "id": other, "type": "private", "first_name": "Alice" }),
    }
}

async fn fake_method(
    State(fake): State<FakeTelegram>,
    Path((bot, method)): Path<(String, String)>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let params: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    fake.calls
        .lock()
        .unwrap()
        .push((method.clone(), params.clone()));

    if bot.strip_prefix("bot") != Some(TEST_TOKEN) {
        return fail(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let now = chrono::Utc::now().timestamp();
    match method.as_str() {
        "getMe" => ok(json!({
            "id": 123456,
            "is_bot": true,
            "first_name": "Test",
            "username": "test_bot",
        })),
        "sendMessage" => {
            let message_id = {
                let mut next = fake.next_message_id.lock().unwrap();
                *next += 1;
                *next
            };
            ok(json!({
                "message_id": message_id,
                "chat": chat_json(&params["chat_id"]),
                "date": now,
                "text": params["text"],
            }))
        }
        "editMessageText" => ok(json!({
            "message_id": params["message_id"],
            "chat": chat_json(&params["chat_id"]),
            "date": now - 5,
            "edit_date": now,
            "text": params["text"],
        })),
        "deleteMessage" => ok(json!(true)),
        "getUpdates" => {
            if fake.webhook_url.lock().unwrap().is_some() {
                return fail(
                    StatusCode::CONFLICT,
                    "Conflict: can't use getUpdates method while webhook is active",
                );
            }
            let offset = params["offset"].as_i64().unwrap_or(0);
            let updates: Vec<Value> = fake
                .updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
                .cloned()
                .collect();
            ok(Value::Array(updates))
        }
        "setWebhook" => {
            *fake.webhook_url.lock().unwrap() = params["url"].as_str().map(str::to_string);
            ok(json!(true))
        }
        "deleteWebhook" => {
            *fake.webhook_url.lock().unwrap() = None;
            ok(json!(true))
        }
        "getWebhookInfo" => {
            let url = fake.webhook_url.lock().unwrap().clone().unwrap_or_default();
            ok(json!({ "url": url, "has_custom_certificate": false, "pending_update_count": 0 }))
        }
        "getChat" => ok(json!({
            "id": params["chat_id"],
            "type": "group",
            "title": "Test group",
        })),
        _ => fail(StatusCode::NOT_FOUND, "Not Found: method not found"),
    }
}
