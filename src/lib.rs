//! Real-time delivery ETA engine.
//!
//! Three scoring stages (cooking, rider allocation, last-mile delivery) fed by
//! live restaurant load from a windowed counter store and road physics from an
//! OSRM-compatible router. The service binary serves the estimate over HTTP;
//! `stream_processor` folds order events into the load counters.

pub mod api;
pub mod config;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod routing;
pub mod scoring;
pub mod stream;
pub mod traffic;
pub mod window;

pub use config::EngineConfig;
pub use models::{EtaResponse, OrderRequest};
pub use orchestrator::{EstimateError, EstimationOrchestrator};
