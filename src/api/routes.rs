use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::middleware::request_logging;
use crate::models::{EtaResponse, OrderRequest};
use crate::orchestrator::{EstimateError, EstimationOrchestrator};
use crate::window::unix_now;

/// Upper bound on an injected backlog.
pub const MAX_SIMULATED_ORDERS: u64 = 10_000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<EstimationOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: EstimationOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .route("/load/:restaurant_id", get(get_load))
        .route("/simulate/:restaurant_id", post(post_simulate))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

/// Estimate delivery time for one order
async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<EtaResponse>, ApiError> {
    let Json(req) = payload.map_err(|r| ApiError::Validation(r.body_text()))?;
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let resp = state.orchestrator.estimate(&req).await?;
    Ok(Json(resp))
}

/// Liveness plus readiness detail. Always 200; `status` says whether
/// `/predict` can currently succeed.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stages = state.orchestrator.stages();
    let store = state.orchestrator.load_reader().store();
    let store_reachable = store.ping().await.is_ok();

    let ready = stages.is_ready();
    Json(HealthResponse {
        status: if ready && store_reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        models_loaded: stages.loaded().iter().map(|k| k.as_str()).collect(),
        models_missing: stages.missing().iter().map(|k| k.as_str()).collect(),
        store_backend: store.backend(),
        store_reachable,
    })
}

/// Current rolling load for a restaurant, as `/predict` would see it
async fn get_load(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> Json<LoadResponse> {
    let live = state
        .orchestrator
        .load_reader()
        .read(&restaurant_id, unix_now())
        .await;
    Json(LoadResponse {
        restaurant_id,
        active_orders_last_20m: live.active_orders,
        data_source: live.source.tag(),
    })
}

/// Inject a synthetic backlog that expires on its own
async fn post_simulate(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Result<Json<SimulateResponse>, ApiError> {
    let Json(body) = payload.map_err(|r| ApiError::Validation(r.body_text()))?;
    if restaurant_id.trim().is_empty() {
        return Err(ApiError::Validation("restaurant_id: must not be empty".to_string()));
    }
    if body.active_orders > MAX_SIMULATED_ORDERS {
        return Err(ApiError::Validation(format!(
            "active_orders: must be at most {} (got {})",
            MAX_SIMULATED_ORDERS, body.active_orders
        )));
    }

    let reader = state.orchestrator.load_reader();
    reader
        .set_simulation(&restaurant_id, body.active_orders)
        .await
        .map_err(ApiError::Store)?;

    let ttl_seconds = reader.window().simulation_ttl_secs;
    info!(
        restaurant_id = %restaurant_id,
        active_orders = body.active_orders,
        ttl_seconds,
        "🧪 Simulation override set"
    );

    Ok(Json(SimulateResponse {
        restaurant_id,
        active_orders: body.active_orders,
        ttl_seconds,
    }))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    active_orders: u64,
}

#[derive(Debug, Serialize)]
struct SimulateResponse {
    restaurant_id: String,
    active_orders: u64,
    ttl_seconds: u64,
}

#[derive(Debug, Serialize)]
struct LoadResponse {
    restaurant_id: String,
    active_orders_last_20m: u64,
    data_source: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    models_loaded: Vec<&'static str>,
    models_missing: Vec<&'static str>,
    store_backend: &'static str,
    store_reachable: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Estimate(EstimateError),
    Store(anyhow::Error),
}

impl From<EstimateError> for ApiError {
    fn from(err: EstimateError) -> Self {
        ApiError::Estimate(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::Estimate(err @ EstimateError::ModelsUnavailable { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Estimate(err @ EstimateError::Scoring(_)) => {
                error!("Scoring error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Store(err) => {
                error!("Counter store error: {:#}", err);
                (StatusCode::SERVICE_UNAVAILABLE, "Counter store unavailable".to_string())
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
