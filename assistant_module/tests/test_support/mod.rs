#![allow(dead_code)]

use assistant_module::service::{
    build_router, compute_line_signature, AppEnv, AppState, ServiceConfig,
    DEFAULT_INBOUND_BODY_MAX_BYTES, LINE_SIGNATURE_HEADER,
};
use assistant_module::store::TableCounts;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const CHANNEL_SECRET: &str = "test-channel-secret";
pub const BOT_USER_ID: &str = "Ubot";
pub const FRONTEND: &str = "https://cal.example.com";

pub fn test_config(temp: &TempDir, line_url: &str, openai_url: &str) -> ServiceConfig {
    ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        app_env: AppEnv::Production,
        line_channel_access_token: Some("channel-token".to_string()),
        line_channel_secret: Some(CHANNEL_SECRET.to_string()),
        line_api_base_url: line_url.to_string(),
        line_data_api_base_url: line_url.to_string(),
        openai_api_key: Some("sk-test".to_string()),
        openai_api_url: openai_url.to_string(),
        extraction_model: "gpt-test".to_string(),
        database_path: temp.path().join("calendar.db"),
        file_storage_root: temp.path().join("files"),
        frontend_base_url: Some(FRONTEND.to_string()),
        default_timezone: chrono_tz::Asia::Taipei,
        inbound_body_max_bytes: DEFAULT_INBOUND_BODY_MAX_BYTES,
    }
}

pub struct TestApp {
    pub temp: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new(line_url: &str, openai_url: &str) -> Self {
        let temp = TempDir::new().expect("tempdir");
        Self::with_config(temp, |temp| test_config(temp, line_url, openai_url))
    }

    pub fn with_config(temp: TempDir, build: impl FnOnce(&TempDir) -> ServiceConfig) -> Self {
        let state = AppState::new(build(&temp)).expect("app state");
        let router = build_router(state.clone());
        Self {
            temp,
            state,
            router,
        }
    }

    pub async fn post_webhook(&self, body: &Value) -> (StatusCode, Value) {
        let raw = serde_json::to_vec(body).expect("serialize webhook");
        let signature = compute_line_signature(CHANNEL_SECRET, &raw).expect("sign");
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(LINE_SIGNATURE_HEADER, signature)
            .body(Body::from(raw))
            .expect("request");
        self.send(request).await
    }

    pub async fn call_rpc(
        &self,
        procedure: &str,
        access_token: Option<&str>,
        input: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/rpc/{}", procedure))
            .header("content-type", "application/json");
        if let Some(token) = access_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = builder
            .body(Body::from(input.to_string()))
            .expect("request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    pub fn counts(&self) -> TableCounts {
        self.state.store.table_counts().expect("table counts")
    }
}

pub fn webhook_body(events: Vec<Value>) -> Value {
    json!({ "destination": BOT_USER_ID, "events": events })
}

pub fn user_source(user_id: &str) -> Value {
    json!({ "type": "user", "userId": user_id })
}

pub fn group_source(group_id: &str, user_id: &str) -> Value {
    json!({ "type": "group", "groupId": group_id, "userId": user_id })
}

pub fn text_event(message_id: &str, source: Value, text: &str) -> Value {
    json!({
        "type": "message",
        "replyToken": format!("reply-{}", message_id),
        "timestamp": 1_760_000_000_000i64,
        "source": source,
        "message": {
            "id": message_id,
            "type": "text",
            "text": text,
            "quoteToken": format!("quote-{}", message_id)
        }
    })
}

pub fn join_event(source: Value) -> Value {
    json!({ "type": "join", "replyToken": "reply-join", "source": source })
}

/// OpenAI chat completion carrying one `create_calendar_event` tool call.
pub fn tool_call_response(arguments: Value) -> String {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "create_calendar_event",
                        "arguments": arguments.to_string()
                    }
                }]
            }
        }]
    })
    .to_string()
}

pub fn plain_answer_response(text: &str) -> String {
    json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] }).to_string()
}

pub fn profile_body(user_id: &str, display_name: &str) -> String {
    json!({ "userId": user_id, "displayName": display_name }).to_string()
}
