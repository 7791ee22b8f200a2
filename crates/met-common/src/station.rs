//! Station reference data.

use chrono::{DateTime, Utc};

/// A physical measurement site.
///
/// Created lazily the first time a record references it. Coordinates may be
/// unknown when the first sighting comes from a feed that carries none; a
/// later sighting fills them in but never overwrites a known location.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub station_id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
}

impl Station {
    /// Whether the station's validity window covers `at`.
    ///
    /// An open bound counts as covering.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        let from_ok = self.active_from.map_or(true, |from| from <= at);
        let to_ok = self.active_to.map_or(true, |to| at <= to);
        from_ok && to_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station(from: Option<i64>, to: Option<i64>) -> Station {
        Station {
            station_id: "00001".to_string(),
            name: None,
            latitude: Some(52.0),
            longitude: Some(13.0),
            elevation: Some(40.0),
            active_from: from.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            active_to: to.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn test_open_window_is_always_active() {
        let at = Utc.timestamp_opt(1_000_000, 0).unwrap();
        assert!(station(None, None).is_active_at(at));
    }

    #[test]
    fn test_bounded_window() {
        let at = Utc.timestamp_opt(500, 0).unwrap();
        assert!(station(Some(0), Some(1000)).is_active_at(at));
        assert!(!station(Some(600), None).is_active_at(at));
        assert!(!station(None, Some(400)).is_active_at(at));
    }
}
