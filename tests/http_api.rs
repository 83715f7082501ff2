use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use lead_capture_server::agent::{LeadCaptureAgent, ModelError, ModelProvider, RetryPolicy};
use lead_capture_server::app::router;
use lead_capture_server::reconcile::Reconciler;
use lead_capture_server::store::{LeadStore, MemoryLeadStore};
use lead_capture_server::types::{AppState, ChatTurn};

struct ScriptedProvider {
    reply: String,
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, _messages: &[ChatTurn]) -> Result<String, ModelError> {
        Ok(self.reply.clone())
    }
}

struct FailingProvider;

#[async_trait]
impl ModelProvider for FailingProvider {
    async fn complete(&self, _messages: &[ChatTurn]) -> Result<String, ModelError> {
        Err(ModelError::Request("connection refused".to_string()))
    }

    fn is_configured(&self) -> bool {
        false
    }
}

fn app_with(provider: Arc<dyn ModelProvider>) -> Router {
    let store: Arc<dyn LeadStore> = Arc::new(MemoryLeadStore::default());
    let state = Arc::new(AppState {
        agent: LeadCaptureAgent::new(
            provider,
            RetryPolicy { attempts: 1, base_delay: Duration::from_millis(1) },
        ),
        reconciler: Reconciler::new(store.clone()),
        store,
    });
    router(state)
}

fn scripted_app(reply: &str) -> Router {
    app_with(Arc::new(ScriptedProvider { reply: reply.to_string() }))
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn root_greets_with_the_api_name() {
    let app = scripted_app("irrelevant");
    let (status, body) = get_json(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap_or("").contains("Lead Capture"));
}

#[tokio::test]
async fn chat_replies_and_stores_the_captured_lead() {
    let app = scripted_app(
        "Lovely to meet you! [LEAD_INFO]{\"name\": \"Ana\", \"email\": \"ana@example.com\"}[/LEAD_INFO]",
    );

    let (status, body) = post_json(
        &app,
        "/chat",
        json!({ "message": "I'm Ana, my email is ana@example.com", "conversation_history": [] }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Lovely to meet you!");
    assert_eq!(body["captured_lead_info"]["email"], "ana@example.com");

    let (status, leads) = get_json(&app, "/leads").await;
    assert_eq!(status, StatusCode::OK);
    let leads = leads.as_array().expect("leads array");
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["name"], "Ana");
    assert_eq!(leads[0]["email"], "ana@example.com");
    // The stored conversation snapshot never leaves the server.
    assert!(leads[0].get("conversation").is_none());
}

#[tokio::test]
async fn repeated_capture_merges_instead_of_duplicating() {
    let app = scripted_app("Noted. [LEAD_INFO]{\"email\": \"ana@example.com\"}[/LEAD_INFO]");

    for _ in 0..2 {
        let (status, _) =
            post_json(&app, "/chat", json!({ "message": "hi again" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, leads) = get_json(&app, "/leads").await;
    assert_eq!(leads.as_array().expect("leads array").len(), 1);
}

#[tokio::test]
async fn conversation_history_is_optional_in_the_request() {
    let app = scripted_app("Hello!");
    let (status, body) = post_json(&app, "/chat", json!({ "message": "hey" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Hello!");
    assert!(body["captured_lead_info"].is_null());
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let app = scripted_app("irrelevant");
    let (status, body) = post_json(&app, "/chat", json!({ "message": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn model_outage_still_returns_a_conversational_reply() {
    let app = app_with(Arc::new(FailingProvider));

    let (status, body) = post_json(&app, "/chat", json!({ "message": "Hello!" })).await;

    assert_eq!(status, StatusCode::OK);
    let message = body["message"].as_str().expect("message text");
    assert!(!message.is_empty());
    assert!(!message.contains("trouble reaching"));
    assert!(body["captured_lead_info"].is_null());
}

#[tokio::test]
async fn model_outage_still_captures_contact_details() {
    let app = app_with(Arc::new(FailingProvider));

    let (status, body) = post_json(
        &app,
        "/chat",
        json!({ "message": "Hi, I'm Ana and my email is ana@example.com" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["captured_lead_info"]["email"], "ana@example.com");

    let (_, leads) = get_json(&app, "/leads").await;
    let leads = leads.as_array().expect("leads array");
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["email"], "ana@example.com");
}

#[tokio::test]
async fn unknown_lead_id_is_a_404() {
    let app = scripted_app("irrelevant");
    let (status, body) = get_json(&app, "/leads/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "lead not found");
}

#[tokio::test]
async fn stored_lead_is_readable_by_id() {
    let app = scripted_app("Ok! [LEAD_INFO]{\"email\": \"ana@example.com\"}[/LEAD_INFO]");
    post_json(&app, "/chat", json!({ "message": "hi" })).await;

    let (_, leads) = get_json(&app, "/leads").await;
    let id = leads[0]["id"].as_i64().expect("lead id");

    let (status, lead) = get_json(&app, &format!("/leads/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lead["email"], "ana@example.com");
}

#[tokio::test]
async fn health_reports_store_and_model_state() {
    let app = app_with(Arc::new(FailingProvider));
    let (status, body) = get_json(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["components"]["store"], "connected");
    assert_eq!(body["components"]["store_kind"], "in-memory");
    assert_eq!(body["components"]["model"], "not_configured");
}

#[tokio::test]
async fn model_probe_reports_upstream_failures() {
    let app = app_with(Arc::new(FailingProvider));
    let (status, body) = get_json(&app, "/test-model").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "error");

    let app = scripted_app("ok");
    let (status, body) = get_json(&app, "/test-model").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "ok");
}
