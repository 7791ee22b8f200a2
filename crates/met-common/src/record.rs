//! The canonical observation/forecast record.

use chrono::{DateTime, Duration, Utc};

use crate::element::Element;

/// A single per-station, per-timestamp, per-element value from one source.
///
/// `value` is already normalized to [`Element::canonical_unit`]; `lead_time`
/// is populated only by forecast-type parsers (valid time minus issue time).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub element: Element,
    pub value: f64,
    pub source_id: String,
    pub lead_time: Option<Duration>,
}

impl Record {
    /// The uniqueness key: at most one stored value per key.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            station_id: self.station_id.clone(),
            timestamp: self.timestamp,
            element: self.element,
            source_id: self.source_id.clone(),
        }
    }
}

/// The `(station, timestamp, element, source)` identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub element: Element,
    pub source_id: String,
}
