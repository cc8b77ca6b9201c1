//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, model, and whether the vector store exists |
//! | `POST` | `/ask` | Answer a question: `{"question": "..."}` |
//! | `POST` | `/ingest` | Ingest a local file: `{"path": "..."}` |
//! | `POST` | `/reload` | Reload the document snapshot and all tables |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "Unsupported file format: .docx" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400),
//! `not_found` (404), `query_failed` (500), `ingest_failed` (500),
//! `reload_failed` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat UI can
//! call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::{App, ReloadSummary};
use crate::ingest::{IngestError, IngestReport};
use crate::models::{EvidenceItem, Route};
use crate::session::handle_question;

/// Build the router around a wired [`App`].
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/ingest", post(handle_ingest))
        .route("/reload", post(handle_reload))
        .layer(cors)
        .with_state(app)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("HR Harness listening on http://{}", bind_addr);

    axum::serve(listener, router(app)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::UnsupportedFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, "unsupported_format", message)
            }
            IngestError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ingest_failed", message),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    vector_store_active: bool,
}

async fn handle_health(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: app.llm.model_name().to_string(),
        vector_store_active: app.config.index.is_active(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    route: Option<Route>,
    evidence: Vec<EvidenceItem>,
}

async fn handle_ask(
    State(app): State<Arc<App>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "question must not be empty",
        ));
    }

    let reply = handle_question(&app.orchestrator, question).await;
    if reply.failed {
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query_failed",
            reply.text,
        ));
    }

    Ok(Json(AskResponse {
        answer: reply.text,
        route: reply.route,
        evidence: reply.evidence,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    path: PathBuf,
}

async fn handle_ingest(
    State(app): State<Arc<App>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let report = app.ingestor.ingest_file(&req.path).await?;
    Ok(Json(report))
}

// ============ POST /reload ============

async fn handle_reload(State(app): State<Arc<App>>) -> Result<Json<ReloadSummary>, AppError> {
    app.reload().await.map(Json).map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "reload_failed",
            format!("{:#}", e),
        )
    })
}
