//! Order lifecycle events as they arrive on the feed.

use serde::Deserialize;

/// Wire shape. Only `restaurant_id` and `timestamp` matter for load; the
/// producer's other fields (`order_id`, `event_type`, `items_count`, ...)
/// are accepted and ignored.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    restaurant_id: Option<String>,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// A well-formed load event.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadEvent {
    pub restaurant_id: String,
    /// Unix seconds, fractional
    pub timestamp: f64,
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotJson,
    MissingRestaurant,
    MissingTimestamp,
    InvalidTimestamp,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotJson => "not_json",
            Self::MissingRestaurant => "missing_restaurant_id",
            Self::MissingTimestamp => "missing_timestamp",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl LoadEvent {
    pub fn parse(raw: &str) -> Result<Self, SkipReason> {
        let event: RawEvent = serde_json::from_str(raw).map_err(|_| SkipReason::NotJson)?;

        let restaurant_id = event
            .restaurant_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(SkipReason::MissingRestaurant)?;
        let timestamp = event.timestamp.ok_or(SkipReason::MissingTimestamp)?;
        if !timestamp.is_finite() || timestamp <= 0.0 {
            return Err(SkipReason::InvalidTimestamp);
        }

        Ok(Self {
            restaurant_id,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_producer_event() {
        let raw = r#"{
            "event_type": "ORDER_CREATED",
            "order_id": "5a0c2b8e-1d7e-4c1b-9b7f-2f0e3c1d4a5b",
            "restaurant_id": "REST_3",
            "timestamp": 1700000123.456,
            "items_count": 2,
            "status": "NEW"
        }"#;
        let ev = LoadEvent::parse(raw).unwrap();
        assert_eq!(ev.restaurant_id, "REST_3");
        assert_eq!(ev.timestamp, 1_700_000_123.456);
    }

    #[test]
    fn test_malformed_events_are_classified() {
        assert_eq!(LoadEvent::parse("not json"), Err(SkipReason::NotJson));
        assert_eq!(
            LoadEvent::parse(r#"{"timestamp": 1700000000.0}"#),
            Err(SkipReason::MissingRestaurant)
        );
        assert_eq!(
            LoadEvent::parse(r#"{"restaurant_id": "", "timestamp": 1700000000.0}"#),
            Err(SkipReason::MissingRestaurant)
        );
        assert_eq!(
            LoadEvent::parse(r#"{"restaurant_id": "r1"}"#),
            Err(SkipReason::MissingTimestamp)
        );
        assert_eq!(
            LoadEvent::parse(r#"{"restaurant_id": "r1", "timestamp": null}"#),
            Err(SkipReason::MissingTimestamp)
        );
        assert_eq!(
            LoadEvent::parse(r#"{"restaurant_id": "r1", "timestamp": 0}"#),
            Err(SkipReason::InvalidTimestamp)
        );
        // Wrong type for a field is not a valid event either.
        assert_eq!(
            LoadEvent::parse(r#"{"restaurant_id": 7, "timestamp": 1700000000.0}"#),
            Err(SkipReason::NotJson)
        );
    }
}
