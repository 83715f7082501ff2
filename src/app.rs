use std::env;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::agent::{LeadCaptureAgent, ModelProvider, OpenAiProvider, RetryPolicy, OFFLINE_REPLY_MARKER};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::store::{LeadStore, MemoryLeadStore, PgLeadStore};
use crate::types::{now_iso, AppState, ChatRequestBody, ChatResponseBody, LeadView};

const GENERIC_APOLOGY: &str =
    "I'm sorry, something went wrong while processing your message. Please try again in a moment.";

pub async fn run() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_capture_server=info".into()),
        )
        .init();

    let port = env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8000);

    let store: Arc<dyn LeadStore> = match resolve_database_url() {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("failed to connect to Postgres");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run database migrations");
            Arc::new(PgLeadStore::new(pool)) as Arc<dyn LeadStore>
        }
        None => {
            warn!("no database configured, leads will be kept in memory only");
            Arc::new(MemoryLeadStore::default())
        }
    };

    let provider = Arc::new(OpenAiProvider::from_env());
    if !provider.is_configured() {
        warn!("OPENAI_API_KEY is not set, every reply will come from the offline responder");
    }

    let state = Arc::new(AppState {
        agent: LeadCaptureAgent::new(provider, RetryPolicy::default()),
        reconciler: Reconciler::new(store.clone()),
        store,
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind server address");
    info!("lead capture server listening on http://{addr}");
    axum::serve(listener, app).await.expect("server error");
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/test-model", get(test_model))
        .route("/chat", post(chat))
        .route("/leads", get(list_leads))
        .route("/leads/{lead_id}", get(get_lead))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Builds a Postgres URL from DATABASE_URL, or from POSTGRES_*/PG* parts.
/// Returns None when nothing points at a database.
fn resolve_database_url() -> Option<String> {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Some(url);
        }
    }

    let host = env::var("POSTGRES_HOST").or_else(|_| env::var("PGHOST")).ok()?;
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_default();
    let database = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "leads".to_string());

    Some(format!("postgres://{user}:{password}@{host}:{port}/{database}"))
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Welcome to the Lead Capture API" }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!("health check could not reach the store: {err}");
            false
        }
    };

    Json(json!({
        "ok": store_ok,
        "now": now_iso(),
        "components": {
            "store": if store_ok { "connected" } else { "unavailable" },
            "store_kind": state.store.kind(),
            "model": if state.agent.provider_configured() { "configured" } else { "not_configured" },
        }
    }))
}

async fn test_model(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.agent.probe_model().await {
        Ok(reply) => Json(json!({ "status": "ok", "reply": reply })).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "status": "error", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        )
            .into_response();
    }

    let response = match run_chat_turn(&state, &body).await {
        Ok(response) => response,
        Err(err) => {
            error!("chat turn failed: {err}");
            ChatResponseBody { message: GENERIC_APOLOGY.to_string(), captured_lead_info: None }
        }
    };

    Json(response).into_response()
}

/// One full conversation turn: model reply (or offline fallback), then a
/// best-effort write of whatever lead fields came back.
async fn run_chat_turn(
    state: &Arc<AppState>,
    body: &ChatRequestBody,
) -> Result<ChatResponseBody, String> {
    let mut reply = state.agent.converse(&body.message, &body.conversation_history).await;
    if reply.message == OFFLINE_REPLY_MARKER {
        reply = state.agent.offline_reply(&body.message, &body.conversation_history);
    }

    if let Some(payload) = reply.lead.as_ref() {
        let history_json = serde_json::to_string(&body.conversation_history)
            .map_err(|err| format!("conversation serialization failed: {err}"))?;
        match state.reconciler.reconcile(payload, &history_json).await {
            Ok(ReconcileOutcome::Created(record)) => info!("created lead {}", record.id),
            Ok(ReconcileOutcome::Merged(record)) => info!("merged into lead {}", record.id),
            Ok(ReconcileOutcome::Skipped) => {}
            Err(err) => warn!("lead write failed, returning the reply anyway: {err}"),
        }
    }

    Ok(ChatResponseBody { message: reply.message, captured_lead_info: reply.lead })
}

async fn list_leads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.list().await {
        Ok(records) => {
            Json(records.iter().map(LeadView::from).collect::<Vec<_>>()).into_response()
        }
        Err(err) => {
            error!("listing leads failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to list leads" })),
            )
                .into_response()
        }
    }
}

async fn get_lead(
    Path(lead_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.store.get(lead_id).await {
        Ok(Some(record)) => Json(LeadView::from(&record)).into_response(),
        Ok(None) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": "lead not found" }))).into_response()
        }
        Err(err) => {
            error!("fetching lead {lead_id} failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch lead" })),
            )
                .into_response()
        }
    }
}
