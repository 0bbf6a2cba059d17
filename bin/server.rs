// Card Query - Web Server
// REST API with Axum around the query pipeline

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use card_query::{
    load_records, question_within_limit, CardRecord, QueryPipeline, Vocabulary, MAX_QUESTION_BYTES,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "card-query-server", version, about = "HTTP API for card portfolio questions")]
struct Args {
    /// Default card records (.json or .csv) used when a request carries none
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// Vocabulary JSON overriding the built-in keyword tables
    #[arg(long)]
    vocabulary: Option<PathBuf>,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

/// Shared application state; read-only after startup
#[derive(Clone)]
struct AppState {
    pipeline: Arc<QueryPipeline>,
    records: Arc<Vec<CardRecord>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<Option<()>> {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    /// Overrides the records loaded at startup
    #[serde(default)]
    records: Option<Vec<CardRecord>>,
}

#[derive(Deserialize)]
struct PlanRequest {
    question: String,
}

// ============================================================================
// API Handlers
// ============================================================================

fn question_too_long() -> axum::response::Response {
    warn!(limit = MAX_QUESTION_BYTES, "Rejecting oversized question");
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(ApiResponse::error(format!("Question longer than {} bytes", MAX_QUESTION_BYTES))),
    )
        .into_response()
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/query - Answer a question over the request's or the default records
async fn query(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> impl IntoResponse {
    if !question_within_limit(&request.question) {
        return question_too_long();
    }
    if request.question.trim().is_empty() {
        warn!("Empty question, answering with the unfiltered record set");
    }

    let records: &[CardRecord] = match &request.records {
        Some(records) => records,
        None => &state.records,
    };

    let answer = state.pipeline.answer(&request.question, records);
    info!(question = %request.question, total = answer.result.total, "answered query");

    (StatusCode::OK, Json(ApiResponse::ok(answer))).into_response()
}

/// POST /api/plan - Structured query for a question, without executing it
async fn plan(State(state): State<AppState>, Json(request): Json<PlanRequest>) -> impl IntoResponse {
    if !question_within_limit(&request.question) {
        return question_too_long();
    }

    let query = state.pipeline.plan(&request.question);
    (StatusCode::OK, Json(ApiResponse::ok(query))).into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let vocabulary = match &args.vocabulary {
        Some(path) => Vocabulary::from_file(path)?,
        None => Vocabulary::default(),
    };

    let records = match &args.records {
        Some(path) => load_records(path)
            .with_context(|| format!("Failed to load records from {:?}", path))?,
        None => Vec::new(),
    };
    info!(count = records.len(), "records loaded");

    let state = AppState {
        pipeline: Arc::new(QueryPipeline::new(vocabulary)),
        records: Arc::new(records),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query))
        .route("/plan", post(plan))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://localhost:{}", args.port);

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
