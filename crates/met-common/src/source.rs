//! Source descriptors and upstream file identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetError;

/// The closed set of upstream file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Forecast bulletins: KMZ container with one KML document.
    Mosmix,
    /// Hourly station observation ZIP archives.
    HourlyObservations,
    /// 10-minute station observation ZIP archives.
    TenMinuteObservations,
    /// Multi-station synoptic report CSV.
    Synop,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Mosmix => "mosmix",
            SourceKind::HourlyObservations => "hourly_observations",
            SourceKind::TenMinuteObservations => "ten_minute_observations",
            SourceKind::Synop => "synop",
        }
    }

    /// Whether records from this kind carry a lead time.
    pub fn is_forecast(&self) -> bool {
        matches!(self, SourceKind::Mosmix)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = MetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mosmix" => Ok(SourceKind::Mosmix),
            "hourly_observations" => Ok(SourceKind::HourlyObservations),
            "ten_minute_observations" => Ok(SourceKind::TenMinuteObservations),
            "synop" => Ok(SourceKind::Synop),
            other => Err(MetError::UnknownSource(other.to_string())),
        }
    }
}

/// How far back/forward a source supplies data, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageWindow {
    #[serde(default)]
    pub back_hours: u32,
    #[serde(default)]
    pub forward_hours: u32,
}

impl Default for CoverageWindow {
    fn default() -> Self {
        Self {
            back_hours: 24,
            forward_hours: 0,
        }
    }
}

/// Static descriptor of an upstream feed.
///
/// Priority ordering is configuration, never inferred; higher wins on
/// conflict, ties break by `id` ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub priority: i32,
    pub coverage: CoverageWindow,
}

/// Identity of one upstream file as of a listing pass.
///
/// The fingerprint is a cheap change detector (ETag, or size plus
/// modification marker); a changed fingerprint for a known path means the
/// file must be reprocessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub source_id: String,
    pub path: String,
    pub fingerprint: String,
}
