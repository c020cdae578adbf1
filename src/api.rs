//! Axum routes over the record store and the chat pipeline.

use crate::chat::{ChatError, ChatOrchestrator, ChatReply};
use crate::config::Config;
use crate::models::USERS;
use crate::provider::{DisabledProvider, GeminiClient, Provider};
use crate::record::{Fields, Record};
use crate::store::{Store, StoreError};
use axum::Router;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use eyre::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Handles shared by every request, built once at startup
pub struct AppState {
    pub users: Arc<Store>,
    pub chat: ChatOrchestrator,
}

impl AppState {
    pub fn new(users: Arc<Store>, chat: ChatOrchestrator) -> Self {
        Self { users, chat }
    }

    /// Open both collections and pick the provider from `config`
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let users = Store::open(config.users_path(), config.corrupt_policy)
            .with_context(|| format!("Failed to open {}", config.users_path().display()))?;
        let chat_log = Store::open(config.chat_log_path(), config.corrupt_policy)
            .with_context(|| format!("Failed to open {}", config.chat_log_path().display()))?;

        let provider: Arc<dyn Provider> = match config.api_key() {
            Some(key) => {
                let client = GeminiClient::new(key, Some(config.gemini_endpoint.as_str()), Some(config.gemini_model.as_str()))
                    .context("Failed to build Gemini client")?;
                info!(model = client.model(), "Using Gemini provider");
                Arc::new(client)
            }
            None => {
                warn!("No Gemini API key configured; chat replies will use the fallback message");
                Arc::new(DisabledProvider)
            }
        };

        info!(
            users = ?users.path(),
            chat_log = ?chat_log.path(),
            policy = ?users.policy(),
            "Opened collections"
        );

        let chat = ChatOrchestrator::new(provider, Arc::new(chat_log)).with_timeout(config.provider_timeout());
        Ok(Self::new(Arc::new(users), chat))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health_check))
        .route("/records", get(list_records).post(create_record))
        .route(
            "/records/:id",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/chat", post(chat))
        .route("/chat/history", get(chat_history))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Error body `{"error": "..."}` with a matching status code
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
    Chat(ChatError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        ApiError::Chat(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Chat(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Store(e) => {
                let status = match &e {
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    StoreError::Corrupt { .. } | StoreError::Io { .. } | StoreError::Json(_) | StoreError::Task(_) => {
                        error!(error = %e, "Store operation failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Request bodies for records must be JSON objects
fn object_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Fields> {
    match body?.0 {
        Value::Object(fields) => Ok(fields),
        _ => Err(ApiError::BadRequest("request body must be a JSON object".to_string())),
    }
}

async fn index() -> Json<Value> {
    Json(json!({
        "message": "PUCIO educational chatbot API",
        "status": "running",
        "endpoints": [
            "/records (GET, POST)",
            "/records/{id} (GET, PUT, DELETE)",
            "/chat (POST)",
            "/chat/history (GET)"
        ]
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION
    }))
}

// GET /records
async fn list_records(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Record>>> {
    Ok(Json(state.users.clone().read_all_async().await?))
}

// POST /records
async fn create_record(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let fields = object_body(body)?;
    USERS.check_required(&fields)?;
    let record = state.users.clone().create_async(fields).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// GET /records/:id
async fn get_record(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult<Json<Record>> {
    let Path(id) = id?;
    Ok(Json(state.users.clone().get_async(id).await?))
}

// PUT /records/:id
async fn update_record(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Record>> {
    let Path(id) = id?;
    let partial = object_body(body)?;
    Ok(Json(state.users.clone().update_async(id, partial).await?))
}

// DELETE /records/:id
async fn delete_record(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    state.users.clone().delete_async(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default, alias = "mensaje")]
    message: Option<String>,
}

// POST /chat
async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatReply>> {
    let Json(req) = body?;
    let message = req.message.unwrap_or_default();
    Ok(Json(state.chat.handle_message(&message).await?))
}

// GET /chat/history
async fn chat_history(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Record>>> {
    Ok(Json(state.chat.chat_log().clone().read_all_async().await?))
}
