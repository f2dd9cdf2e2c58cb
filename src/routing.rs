//! Road-network physics via an OSRM-compatible routing service.
//!
//! `route` never fails: timeouts, transport errors, non-2xx statuses, bodies
//! that don't parse, and `code != "Ok"` all collapse to the configured
//! fallback pair so the delivery stage always gets two finite numbers.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RoutingConfig;

/// WGS84 point. OSRM takes `lon,lat` order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteResult {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub source: RouteSource,
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(&self, origin: Coordinate, destination: Coordinate) -> RouteResult;
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
}

#[derive(Clone)]
pub struct OsrmClient {
    client: Client,
    base_url: String,
    fallback: RouteResult,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build OSRM client")?;

        Ok(Self {
            client,
            base_url: config.osrm_host.trim_end_matches('/').to_string(),
            fallback: RouteResult {
                distance_meters: config.fallback_distance_meters,
                duration_seconds: config.fallback_duration_seconds,
                source: RouteSource::Fallback,
            },
        })
    }

    pub fn fallback(&self) -> RouteResult {
        self.fallback
    }

    #[inline]
    fn url(&self, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}",
            self.base_url, origin.lon, origin.lat, destination.lon, destination.lat
        )
    }

    async fn try_route(&self, origin: Coordinate, destination: Coordinate) -> Result<RouteResult> {
        let resp = self
            .client
            .get(self.url(origin, destination))
            .query(&[("overview", "false")])
            .send()
            .await
            .context("OSRM request failed")?;

        if !resp.status().is_success() {
            bail!("OSRM returned {}", resp.status());
        }

        let body = resp
            .json::<OsrmResponse>()
            .await
            .context("Failed to parse OSRM response")?;

        if body.code != "Ok" {
            bail!(
                "OSRM code {}: {}",
                body.code,
                body.message.unwrap_or_default()
            );
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OSRM returned no routes"))?;

        if !(route.distance.is_finite() && route.duration.is_finite())
            || route.distance < 0.0
            || route.duration < 0.0
        {
            bail!(
                "OSRM returned invalid route ({}, {})",
                route.distance,
                route.duration
            );
        }

        Ok(RouteResult {
            distance_meters: route.distance,
            duration_seconds: route.duration,
            source: RouteSource::Provider,
        })
    }
}

#[async_trait]
impl RouteProvider for OsrmClient {
    async fn route(&self, origin: Coordinate, destination: Coordinate) -> RouteResult {
        match self.try_route(origin, destination).await {
            Ok(r) => {
                debug!(
                    distance_m = r.distance_meters,
                    duration_s = r.duration_seconds,
                    "OSRM route"
                );
                r
            }
            Err(e) => {
                warn!(error = %e, "⚠️ OSRM unavailable, using fallback route");
                self.fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(host: String, timeout_ms: u64) -> OsrmClient {
        OsrmClient::new(&RoutingConfig {
            osrm_host: host,
            timeout_ms,
            ..RoutingConfig::default()
        })
        .unwrap()
    }

    const ORIGIN: Coordinate = Coordinate { lon: 76.93, lat: 8.52 };
    const DEST: Coordinate = Coordinate { lon: 76.94, lat: 8.53 };

    #[tokio::test]
    async fn test_healthy_provider() {
        let app = Router::new().route(
            "/route/v1/driving/:coords",
            get(|| async {
                Json(json!({
                    "code": "Ok",
                    "routes": [{ "distance": 2000.0, "duration": 600.0, "weight": 600.0 }],
                    "waypoints": []
                }))
            }),
        );
        let osrm = client(serve(app).await, 2000);
        let r = osrm.route(ORIGIN, DEST).await;
        assert_eq!(r.distance_meters, 2000.0);
        assert_eq!(r.duration_seconds, 600.0);
        assert_eq!(r.source, RouteSource::Provider);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let app = Router::new().route(
            "/route/v1/driving/:coords",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "code": "Ok", "routes": [{ "distance": 1.0, "duration": 1.0 }] }))
            }),
        );
        let osrm = client(serve(app).await, 200);
        let r = osrm.route(ORIGIN, DEST).await;
        assert_eq!(r, osrm.fallback());
        assert_eq!(r.distance_meters, 0.0);
        assert_eq!(r.duration_seconds, 0.0);
    }

    #[tokio::test]
    async fn test_no_route_code_falls_back() {
        let app = Router::new().route(
            "/route/v1/driving/:coords",
            get(|| async { Json(json!({ "code": "NoRoute", "message": "Impossible route" })) }),
        );
        let r = client(serve(app).await, 2000).route(ORIGIN, DEST).await;
        assert_eq!(r.source, RouteSource::Fallback);
    }

    #[tokio::test]
    async fn test_server_error_and_garbage_fall_back() {
        let app = Router::new()
            .route(
                "/route/v1/driving/:coords",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let r = client(serve(app).await, 2000).route(ORIGIN, DEST).await;
        assert_eq!(r.source, RouteSource::Fallback);

        let app = Router::new().route("/route/v1/driving/:coords", get(|| async { "not json" }));
        let r = client(serve(app).await, 2000).route(ORIGIN, DEST).await;
        assert_eq!(r.source, RouteSource::Fallback);
    }

    #[tokio::test]
    async fn test_unreachable_host_falls_back() {
        let r = client("http://127.0.0.1:1".to_string(), 500)
            .route(ORIGIN, DEST)
            .await;
        assert_eq!(r.source, RouteSource::Fallback);
    }

    #[test]
    fn test_url_is_lon_lat_ordered() {
        let osrm = client("http://osrm:5000/".to_string(), 2000);
        assert_eq!(
            osrm.url(ORIGIN, DEST),
            "http://osrm:5000/route/v1/driving/76.93,8.52;76.94,8.53"
        );
    }
}
