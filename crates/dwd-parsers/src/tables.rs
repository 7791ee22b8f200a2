//! Shared column plumbing for the delimited observation formats.

use chrono::{DateTime, NaiveDate, Utc};

use met_common::Element;

/// One known product column: target element plus the affine map from the
/// upstream unit to the canonical one.
pub(crate) struct ColumnSpec {
    pub column: &'static str,
    pub element: Element,
    scale: f64,
    offset: f64,
}

impl ColumnSpec {
    pub(crate) const fn direct(column: &'static str, element: Element) -> Self {
        Self {
            column,
            element,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub(crate) const fn scaled(
        column: &'static str,
        element: Element,
        scale: f64,
        offset: f64,
    ) -> Self {
        Self {
            column,
            element,
            scale,
            offset,
        }
    }

    /// Convert an upstream value to the canonical unit.
    ///
    /// Converted values are rounded to two decimals; pass-through values
    /// keep the upstream precision.
    pub(crate) fn convert(&self, raw: f64) -> f64 {
        if self.scale == 1.0 && self.offset == 0.0 {
            raw
        } else {
            round2(raw * self.scale + self.offset)
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse a compact `YYYYMMDDHH` or `YYYYMMDDHHMM` timestamp as UTC.
pub(crate) fn parse_compact_timestamp(raw: &str, with_minutes: bool) -> Option<DateTime<Utc>> {
    let expected = if with_minutes { 12 } else { 10 };
    if raw.len() != expected || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(
        raw[0..4].parse().ok()?,
        raw[4..6].parse().ok()?,
        raw[6..8].parse().ok()?,
    )?;
    let hour: u32 = raw[8..10].parse().ok()?;
    let minute: u32 = if with_minutes {
        raw[10..12].parse().ok()?
    } else {
        0
    };
    Some(date.and_hms_opt(hour, minute, 0)?.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_rounds_after_scaling() {
        let spec = ColumnSpec::scaled("TT", Element::Temperature, 1.0, 273.15);
        assert_eq!(spec.convert(15.9), 289.05);
    }

    #[test]
    fn test_direct_keeps_precision() {
        let spec = ColumnSpec::direct("F", Element::WindSpeed);
        assert_eq!(spec.convert(1.2345), 1.2345);
    }

    #[test]
    fn test_compact_timestamp_hourly() {
        let ts = parse_compact_timestamp("2023060112", false).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_compact_timestamp_ten_minute() {
        let ts = parse_compact_timestamp("202306011250", true).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-06-01T12:50:00+00:00");
    }

    #[test]
    fn test_compact_timestamp_rejects_bad_input() {
        assert!(parse_compact_timestamp("2023060112", true).is_none());
        assert!(parse_compact_timestamp("20230601xx", false).is_none());
        assert!(parse_compact_timestamp("2023133112", false).is_none());
    }
}
