//! Time-of-day traffic multiplier.
//!
//! Two Gaussian rush-hour bumps on top of free-flow (1.0): a morning peak at
//! 09:00 (+0.4) and a heavier evening peak at 18:00 (+0.5), both with a
//! two-hour standard deviation. The delivery model was trained against this
//! exact curve, so any change here has to ship with a retrained model.

const MORNING_PEAK_HOUR: f64 = 9.0;
const EVENING_PEAK_HOUR: f64 = 18.0;
const MORNING_WEIGHT: f64 = 0.4;
const EVENING_WEIGHT: f64 = 0.5;
const PEAK_WIDTH_HOURS: f64 = 2.0;

#[inline]
fn peak(hour: f64, center: f64, weight: f64) -> f64 {
    let z = (hour - center) / PEAK_WIDTH_HOURS;
    weight * (-0.5 * z * z).exp()
}

/// Multiplicative slowdown for `hour_of_day` (fractional hours allowed). Always >= 1.0.
pub fn traffic_factor(hour_of_day: f64) -> f64 {
    1.0 + peak(hour_of_day, MORNING_PEAK_HOUR, MORNING_WEIGHT)
        + peak(hour_of_day, EVENING_PEAK_HOUR, EVENING_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_dominate_off_hours() {
        assert!(traffic_factor(9.0) > traffic_factor(3.0));
        assert!(traffic_factor(18.0) > traffic_factor(9.0));
    }

    #[test]
    fn test_never_below_free_flow() {
        for h in 0..=23 {
            assert!(traffic_factor(h as f64) >= 1.0, "hour {}", h);
        }
    }

    #[test]
    fn test_reference_values() {
        // Evening peak plus the morning tail: 1 + 0.5 + 0.4 * exp(-10.125)
        let expected = 1.0 + 0.5 + 0.4 * (-10.125f64).exp();
        assert!((traffic_factor(18.0) - expected).abs() < 1e-12);
        // Midnight is effectively free-flow.
        assert!((traffic_factor(0.0) - 1.0).abs() < 1e-3);
    }
}
