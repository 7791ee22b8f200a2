//! Linear temporal interpolation.

use chrono::{DateTime, Utc};

/// Interpolate linearly between two bracketing observations.
///
/// Degenerate brackets (zero or negative span) return the earlier value.
pub fn lerp(
    t0: DateTime<Utc>,
    v0: f64,
    t1: DateTime<Utc>,
    v1: f64,
    t: DateTime<Utc>,
) -> f64 {
    let span = (t1 - t0).num_seconds() as f64;
    if span <= 0.0 {
        return v0;
    }
    let fraction = (t - t0).num_seconds() as f64 / span;
    v0 + (v1 - v0) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_midpoint() {
        assert_eq!(lerp(ts(0), 10.0, ts(20), 20.0, ts(10)), 15.0);
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(lerp(ts(0), 10.0, ts(20), 20.0, ts(0)), 10.0);
        assert_eq!(lerp(ts(0), 10.0, ts(20), 20.0, ts(20)), 20.0);
    }

    #[test]
    fn test_uneven_fraction() {
        let value = lerp(ts(0), 0.0, ts(30), 3.0, ts(10));
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_span_returns_earlier_value() {
        assert_eq!(lerp(ts(10), 7.0, ts(10), 9.0, ts(10)), 7.0);
    }
}
