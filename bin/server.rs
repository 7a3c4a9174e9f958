// Parcel Valuation - Web Server
// REST API with Axum over the valuation engine

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parcel_valuation::{
    MarketTrendsRequest, ValuationConfig, ValuationEngine, ValuationError, ValuationRequest, VERSION,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<ValuationEngine>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

fn status_for(err: &ValuationError) -> StatusCode {
    match err {
        ValuationError::InsufficientInput(_) | ValuationError::NoEstimatesAvailable => StatusCode::UNPROCESSABLE_ENTITY,
        ValuationError::Config(_) => StatusCode::NOT_FOUND,
        ValuationError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ValuationError::EnrichmentTimeout { .. } | ValuationError::EnrichmentFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Run blocking engine work off the async runtime
async fn run_blocking<T, F>(state: AppState, work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&ValuationEngine) -> Result<T, ValuationError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || work(&state.engine)).await {
        Ok(Ok(data)) => ApiResponse::ok(data),
        Ok(Err(e)) => error_response(status_for(&e), e.to_string()),
        Err(e) => {
            error!(error = %e, "engine task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ledgers: Vec<LedgerStatus>,
}

#[derive(Serialize)]
struct LedgerStatus {
    key: String,
    loaded: bool,
}

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let ledgers = state
        .engine
        .ledger_keys()
        .into_iter()
        .map(|key| LedgerStatus {
            loaded: state.engine.is_loaded(&key),
            key,
        })
        .collect();

    ApiResponse::ok(HealthResponse {
        status: "OK",
        version: VERSION,
        ledgers,
    })
}

/// GET /api/ledgers/:key/stats - Ledger statistics (loads on first access)
async fn get_ledger_stats(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    run_blocking(state, move |engine| engine.warm(&key)).await
}

/// GET /api/ledgers/:key/parcels/:parcel_id/sales - Newest-first sales history
async fn get_parcel_sales(
    State(state): State<AppState>,
    Path((key, parcel_id)): Path<(String, String)>,
) -> impl IntoResponse {
    // Decode URL-encoded parcel id ("110-39-4004-000", "110 39 4004 000")
    let decoded = urlencoding::decode(&parcel_id)
        .unwrap_or_else(|_| parcel_id.clone().into())
        .into_owned();

    run_blocking(state, move |engine| engine.sales_history(&key, &decoded, false)).await
}

/// POST /api/valuations - Value a subject property
async fn create_valuation(State(state): State<AppState>, Json(request): Json<ValuationRequest>) -> impl IntoResponse {
    run_blocking(state, move |engine| engine.triangulate_property_value(&request)).await
}

/// POST /api/market-trends - Sales count and median price over 6/12/24 months
async fn get_market_trends(
    State(state): State<AppState>,
    Json(request): Json<MarketTrendsRequest>,
) -> impl IntoResponse {
    run_blocking(state, move |engine| engine.market_trends(&request)).await
}

/// POST /api/cache/:key/warm - Build a ledger index now
async fn warm_cache(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    run_blocking(state, move |engine| engine.warm(&key)).await
}

#[derive(Serialize)]
struct InvalidateResponse {
    key: String,
    dropped: bool,
}

/// POST /api/cache/:key/invalidate - Force the next access to reload
async fn invalidate_cache(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    run_blocking(state, move |engine| {
        let dropped = engine.invalidate(&key)?;
        Ok(InvalidateResponse { key, dropped })
    })
    .await
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🌐 Parcel Valuation - Web Server v{}", VERSION);

    let config = match env::var("VALUATION_CONFIG") {
        Ok(path) => ValuationConfig::from_file(&path)?,
        Err(_) => {
            info!("VALUATION_CONFIG not set, using defaults (no ledgers registered)");
            ValuationConfig::default()
        }
    };
    info!(ledgers = config.ledgers.len(), "configuration loaded");

    // Create shared state
    let state = AppState {
        engine: Arc::new(ValuationEngine::new(config)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ledgers/:key/stats", get(get_ledger_stats))
        .route("/ledgers/:key/parcels/:parcel_id/sales", get(get_parcel_sales))
        .route("/valuations", post(create_valuation))
        .route("/market-trends", post(get_market_trends))
        .route("/cache/:key/warm", post(warm_cache))
        .route("/cache/:key/invalidate", post(invalidate_cache))
        .with_state(state);

    // Build main router
    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr = env::var("VALUATION_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
