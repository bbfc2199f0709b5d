// ANS Expenses - Read API
// Serves the SQLite store built by `ans-expenses run` / `build-db`

use anyhow::Context;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use ans_expenses::{
    cnpj, get_operator, get_operator_expenses, get_statistics, list_operators, logging,
};

const DEFAULT_DB_PATH: &str = "output/ans.db";
const DEFAULT_BIND: &str = "0.0.0.0:8000";

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

enum ApiError {
    NotFound,
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Operadora não encontrada".to_string()),
            ApiError::Unprocessable(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Internal(detail) => {
                error!(%detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Erro interno".to_string())
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

fn with_db<T>(
    state: &AppState,
    f: impl FnOnce(&Connection) -> anyhow::Result<T>,
) -> Result<T, ApiError> {
    let conn = state
        .db
        .lock()
        .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
    Ok(f(&conn)?)
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
}

impl ListParams {
    /// page ≥ 1 and 1 ≤ limit ≤ 100
    fn validated(&self) -> Result<(u32, u32), ApiError> {
        let page = self.page.unwrap_or(DEFAULT_PAGE as i64);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT as i64);

        let page = u32::try_from(page)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::Unprocessable("page must be greater than or equal to 1".into()))?;
        let limit = u32::try_from(limit)
            .ok()
            .filter(|l| (1..=MAX_LIMIT).contains(l))
            .ok_or_else(|| ApiError::Unprocessable(format!("limit must be between 1 and {}", MAX_LIMIT)))?;

        Ok((page, limit))
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": ans_expenses::VERSION }))
}

/// GET /api/operadoras?page=&limit=&search=
async fn list_operadoras(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let (page, limit) = params.validated()?;

    let result = with_db(&state, |conn| {
        list_operators(conn, page, limit, params.search.as_deref())
    })?;
    Ok(Json(result))
}

/// GET /api/operadoras/:cnpj
async fn get_operadora(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = cnpj::normalize_identifier(&raw);
    let operator = with_db(&state, |conn| get_operator(conn, &key))?;
    operator.map(Json).ok_or(ApiError::NotFound)
}

/// GET /api/operadoras/:cnpj/despesas
async fn get_operadora_despesas(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = cnpj::normalize_identifier(&raw);
    let expenses = with_db(&state, |conn| get_operator_expenses(conn, &key))?;
    Ok(Json(expenses))
}

/// GET /api/estatisticas
async fn get_estatisticas(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = with_db(&state, get_statistics)?;
    Ok(Json(stats))
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/operadoras", get(list_operadoras))
        .route("/operadoras/:cnpj", get(get_operadora))
        .route("/operadoras/:cnpj/despesas", get(get_operadora_despesas))
        .route("/estatisticas", get(get_estatisticas))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging(false);

    println!("🌐 ANS Expenses - Read API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Database path: first argument, then ANS_DB_PATH, then the default
    let db_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ANS_DB_PATH").ok())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let db_path = std::path::Path::new(&db_path);

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: ans-expenses run --config <config.toml>");
        eprintln!("   to build it first.");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path).context("Failed to open database")?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };
    let app = router(state);

    let addr = std::env::var("ANS_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/operadoras", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
