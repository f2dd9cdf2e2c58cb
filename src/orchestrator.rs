//! Per-request ETA pipeline.
//!
//! ```text
//! live load ─┐
//!            ├─> cooking (+ backlog) ─┐
//! routing ───┤   allocation ──────────┼─> total
//! traffic ───┘   delivery ────────────┘
//! ```
//!
//! Load and routing are fetched concurrently and both degrade to defaults on
//! failure. A missing scoring stage fails the whole request; there is no
//! partial estimate.

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::models::{
    minutes_one_decimal, Breakdown, EtaResponse, LiveContext, OrderRequest, PhysicsData,
};
use crate::routing::RouteProvider;
use crate::scoring::{ModelError, StageKind, StageRegistry};
use crate::traffic::traffic_factor;
use crate::window::{unix_now, LiveLoadReader};

#[derive(Debug, Clone, PartialEq)]
pub enum EstimateError {
    /// One or more stages never loaded; the service isn't warmed up.
    ModelsUnavailable { missing: Vec<StageKind> },
    Scoring(ModelError),
}

impl fmt::Display for EstimateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelsUnavailable { missing } => {
                let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
                write!(f, "Models are not loaded: {}", names.join(", "))
            }
            Self::Scoring(e) => write!(f, "Scoring failed: {}", e),
        }
    }
}

impl std::error::Error for EstimateError {}

impl From<ModelError> for EstimateError {
    fn from(e: ModelError) -> Self {
        EstimateError::Scoring(e)
    }
}

/// Clamp a model output at zero and truncate to whole seconds.
#[inline]
fn whole_seconds(prediction: f32) -> u64 {
    if prediction <= 0.0 {
        0
    } else {
        prediction as u64
    }
}

#[derive(Clone)]
pub struct EstimationOrchestrator {
    stages: Arc<StageRegistry>,
    load: LiveLoadReader,
    router: Arc<dyn RouteProvider>,
    backlog_penalty_secs: u64,
}

impl EstimationOrchestrator {
    pub fn new(
        stages: Arc<StageRegistry>,
        load: LiveLoadReader,
        router: Arc<dyn RouteProvider>,
        backlog_penalty_secs: u64,
    ) -> Self {
        Self {
            stages,
            load,
            router,
            backlog_penalty_secs,
        }
    }

    pub fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    pub fn load_reader(&self) -> &LiveLoadReader {
        &self.load
    }

    pub fn backlog_penalty_secs(&self) -> u64 {
        self.backlog_penalty_secs
    }

    pub async fn estimate(&self, req: &OrderRequest) -> Result<EtaResponse, EstimateError> {
        self.estimate_at(req, unix_now()).await
    }

    /// Run the pipeline with an explicit wall clock (unix seconds) for the
    /// live load window. `req` must already be validated.
    pub async fn estimate_at(
        &self,
        req: &OrderRequest,
        now: i64,
    ) -> Result<EtaResponse, EstimateError> {
        let (cooking, allocation, delivery) = match (
            self.stages.get(StageKind::Cooking),
            self.stages.get(StageKind::Allocation),
            self.stages.get(StageKind::Delivery),
        ) {
            (Some(c), Some(a), Some(d)) => (c, a, d),
            _ => {
                return Err(EstimateError::ModelsUnavailable {
                    missing: self.stages.missing(),
                })
            }
        };

        let (live, route) = tokio::join!(
            self.load.read(&req.restaurant_id, now),
            self.router.route(req.origin(), req.destination()),
        );
        let hour = req.hour_of_day as f64;
        let traffic = traffic_factor(hour);

        let base_cooking = cooking.predict(&[
            req.items_count as f32,
            req.cuisine_complexity as f32,
            req.hour_of_day as f32,
            req.day_of_week as f32,
        ])?;
        let base_cooking_seconds = whole_seconds(base_cooking);
        let kitchen_delay_seconds = live.active_orders.saturating_mul(self.backlog_penalty_secs);
        let cooking_seconds = base_cooking_seconds.saturating_add(kitchen_delay_seconds);

        let allocation_seconds = whole_seconds(allocation.predict(&[
            req.rider_supply_index as f32,
            req.hour_of_day as f32,
            req.day_of_week as f32,
        ])?);

        let delivery_seconds = whole_seconds(delivery.predict(&[
            route.distance_meters as f32,
            route.duration_seconds as f32,
            traffic as f32,
            req.hour_of_day as f32,
        ])?);

        let breakdown = Breakdown {
            cooking_seconds,
            base_cooking_seconds,
            kitchen_delay_seconds,
            allocation_seconds,
            delivery_seconds,
        };
        let total = breakdown.total_seconds();

        debug!(
            restaurant_id = %req.restaurant_id,
            active_orders = live.active_orders,
            cooking_seconds,
            allocation_seconds,
            delivery_seconds,
            total,
            "Estimate assembled"
        );

        Ok(EtaResponse {
            total_eta_seconds: total,
            total_eta_minutes: minutes_one_decimal(total),
            breakdown,
            physics_data: PhysicsData {
                distance_meters: route.distance_meters,
                base_duration: route.duration_seconds,
                traffic_factor: traffic,
                source: route.source,
            },
            live_context: LiveContext {
                restaurant_id: req.restaurant_id.clone(),
                active_orders_last_20m: live.active_orders,
                data_source: live.source.tag().to_string(),
            },
        })
    }
}
