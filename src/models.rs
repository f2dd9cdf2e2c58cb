//! Request/response types for the estimate endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::routing::{Coordinate, RouteSource};

/// Incoming order. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub restaurant_id: String,
    /// Number of items in the order (> 0)
    pub items_count: u32,
    /// 1.0 (fast food) to 2.0 (gourmet)
    pub cuisine_complexity: f64,
    /// 0.5 (scarce) to 2.0 (abundant)
    pub rider_supply_index: f64,

    pub start_lat: f64,
    pub start_lon: f64,
    pub end_lat: f64,
    pub end_lon: f64,

    /// 0-23
    pub hour_of_day: u8,
    /// 0-6
    pub day_of_week: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError {
            field,
            reason: format!("must be between {} and {} (got {})", min, max, value),
        });
    }
    Ok(())
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.restaurant_id.trim().is_empty() {
            return Err(ValidationError {
                field: "restaurant_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.items_count == 0 {
            return Err(ValidationError {
                field: "items_count",
                reason: "must be greater than 0".to_string(),
            });
        }
        check_range("cuisine_complexity", self.cuisine_complexity, 1.0, 2.0)?;
        check_range("rider_supply_index", self.rider_supply_index, 0.5, 2.0)?;
        check_range("start_lat", self.start_lat, -90.0, 90.0)?;
        check_range("start_lon", self.start_lon, -180.0, 180.0)?;
        check_range("end_lat", self.end_lat, -90.0, 90.0)?;
        check_range("end_lon", self.end_lon, -180.0, 180.0)?;
        if self.hour_of_day > 23 {
            return Err(ValidationError {
                field: "hour_of_day",
                reason: format!("must be between 0 and 23 (got {})", self.hour_of_day),
            });
        }
        if self.day_of_week > 6 {
            return Err(ValidationError {
                field: "day_of_week",
                reason: format!("must be between 0 and 6 (got {})", self.day_of_week),
            });
        }
        Ok(())
    }

    pub fn origin(&self) -> Coordinate {
        Coordinate::new(self.start_lon, self.start_lat)
    }

    pub fn destination(&self) -> Coordinate {
        Coordinate::new(self.end_lon, self.end_lat)
    }
}

/// Whole-second component times. `cooking_seconds` already includes
/// `kitchen_delay_seconds`; the three headline components sum exactly to
/// `EtaResponse::total_eta_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub cooking_seconds: u64,
    pub base_cooking_seconds: u64,
    pub kitchen_delay_seconds: u64,
    pub allocation_seconds: u64,
    pub delivery_seconds: u64,
}

impl Breakdown {
    /// Saturates at `u64::MAX` rather than wrapping.
    pub fn total_seconds(&self) -> u64 {
        self.cooking_seconds
            .saturating_add(self.allocation_seconds)
            .saturating_add(self.delivery_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsData {
    pub distance_meters: f64,
    pub base_duration: f64,
    pub traffic_factor: f64,
    pub source: RouteSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveContext {
    pub restaurant_id: String,
    pub active_orders_last_20m: u64,
    pub data_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaResponse {
    pub total_eta_seconds: u64,
    pub total_eta_minutes: f64,
    pub breakdown: Breakdown,
    pub physics_data: PhysicsData,
    pub live_context: LiveContext,
}

/// Seconds to minutes, rounded half away from zero to one decimal.
pub fn minutes_one_decimal(seconds: u64) -> f64 {
    (seconds as f64 / 60.0 * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OrderRequest {
        OrderRequest {
            restaurant_id: "r1".to_string(),
            items_count: 3,
            cuisine_complexity: 1.2,
            rider_supply_index: 1.0,
            start_lat: 8.52,
            start_lon: 76.93,
            end_lat: 8.53,
            end_lon: 76.94,
            hour_of_day: 9,
            day_of_week: 1,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut req = sample();
        req.cuisine_complexity = 2.0;
        req.rider_supply_index = 0.5;
        req.hour_of_day = 23;
        req.day_of_week = 6;
        req.validate().unwrap();
    }

    #[test]
    fn test_out_of_range_fields_rejected() {
        let cases: Vec<(fn(&mut OrderRequest), &str)> = vec![
            (|r| r.items_count = 0, "items_count"),
            (|r| r.cuisine_complexity = 2.5, "cuisine_complexity"),
            (|r| r.cuisine_complexity = f64::NAN, "cuisine_complexity"),
            (|r| r.rider_supply_index = 0.4, "rider_supply_index"),
            (|r| r.start_lat = 91.0, "start_lat"),
            (|r| r.end_lon = -181.0, "end_lon"),
            (|r| r.hour_of_day = 24, "hour_of_day"),
            (|r| r.day_of_week = 7, "day_of_week"),
            (|r| r.restaurant_id = "  ".to_string(), "restaurant_id"),
        ];
        for (mutate, field) in cases {
            let mut req = sample();
            mutate(&mut req);
            assert_eq!(req.validate().unwrap_err().field, field);
        }
    }

    #[test]
    fn test_coordinates_are_lon_lat() {
        let req = sample();
        assert_eq!(req.origin(), Coordinate::new(76.93, 8.52));
        assert_eq!(req.destination(), Coordinate::new(76.94, 8.53));
    }

    #[test]
    fn test_minutes_rounding() {
        assert_eq!(minutes_one_decimal(0), 0.0);
        assert_eq!(minutes_one_decimal(1_500), 25.0);
        assert_eq!(minutes_one_decimal(1_520), 25.3);
        assert_eq!(minutes_one_decimal(100), 1.7);
    }

    #[test]
    fn test_breakdown_total() {
        let b = Breakdown {
            cooking_seconds: 960,
            base_cooking_seconds: 660,
            kitchen_delay_seconds: 300,
            allocation_seconds: 180,
            delivery_seconds: 720,
        };
        assert_eq!(b.total_seconds(), 1_860);
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json["kitchen_delay_seconds"], 300);
    }

    #[test]
    fn test_breakdown_total_saturates() {
        let b = Breakdown {
            cooking_seconds: u64::MAX,
            base_cooking_seconds: 600,
            kitchen_delay_seconds: u64::MAX - 600,
            allocation_seconds: 180,
            delivery_seconds: 720,
        };
        assert_eq!(b.total_seconds(), u64::MAX);
    }
}
