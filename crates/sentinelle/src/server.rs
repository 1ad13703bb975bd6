//! HTTP API for the moderation pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/moderate` | Run the pipeline, returns a `ModerationReport` |
//!
//! `POST /moderate` takes
//!
//! ```json
//! { "user_id": "user123", "text": "...", "image_base64": "...", "audio_base64": "..." }
//! ```
//!
//! with every field but `user_id` optional; media is standard base64.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "user_id must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `store_unavailable` (503),
//! `internal` (500).
//!
//! CORS is fully permissive.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sentinelle_core::models::ModerationRequest;
use sentinelle_core::pipeline::{ModerationReport, Pipeline};

use crate::config::Config;
use crate::services;

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// Build services from `config` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = services::build(config).await?;
    services.archivist.ensure_collections().await?;

    let app = build_router(services.pipeline, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "moderation server listening");
    println!("SentinELLE listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(pipeline: Pipeline, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/moderate", post(handle_moderate))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<sentinelle_core::Error> for AppError {
    fn from(err: sentinelle_core::Error) -> Self {
        if err.is_store_unavailable() {
            tracing::warn!(error = %err, "moderation aborted: store unavailable");
            AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "store_unavailable",
                message: err.to_string(),
            }
        } else {
            tracing::error!(error = %err, "moderation failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: err.to_string(),
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /moderate ============

#[derive(Debug, Deserialize)]
struct ModerateBody {
    user_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    audio_base64: Option<String>,
}

fn decode_media(field: &str, value: Option<&str>) -> Result<Option<Vec<u8>>, AppError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            base64::engine::general_purpose::STANDARD
                .decode(v)
                .map_err(|e| bad_request(format!("{} is not valid base64: {}", field, e)))
        })
        .transpose()
}

impl ModerateBody {
    fn into_request(self) -> Result<ModerationRequest, AppError> {
        if self.user_id.trim().is_empty() {
            return Err(bad_request("user_id must not be empty"));
        }
        Ok(ModerationRequest {
            image: decode_media("image_base64", self.image_base64.as_deref())?,
            audio: decode_media("audio_base64", self.audio_base64.as_deref())?,
            user_id: self.user_id,
            text: self.text,
        })
    }
}

async fn handle_moderate(
    State(state): State<AppState>,
    body: Result<Json<ModerateBody>, JsonRejection>,
) -> Result<Json<ModerationReport>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let request = body.into_request()?;
    let report = state.pipeline.run(&request).await?;
    Ok(Json(report))
}
