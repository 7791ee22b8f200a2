//! Parsers for the upstream weather-service file formats.
//!
//! Each parser turns raw file bytes into canonical records, converting
//! values to the canonical unit table as it goes. Row-local problems are
//! skipped and counted; only structural problems fail a whole file.

pub mod error;
pub mod mosmix;
pub mod observations;
pub mod synop;

mod tables;

pub use error::ParseError;

use met_common::{Record, SourceKind, Station};

/// Result of parsing one upstream file.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Canonical records, unit-normalized.
    pub records: Vec<Record>,
    /// Stations sighted in the file, for lazy station creation.
    pub stations: Vec<Station>,
    /// Rows (or value blocks) that could not be parsed and were skipped.
    pub skipped_rows: u64,
}

/// Parse `raw` according to `kind`, producing canonical records.
///
/// `file_name` is used only for error reporting.
pub fn parse(
    kind: SourceKind,
    source_id: &str,
    file_name: &str,
    raw: &[u8],
) -> Result<ParseOutcome, ParseError> {
    match kind {
        SourceKind::Mosmix => mosmix::parse(source_id, file_name, raw),
        SourceKind::HourlyObservations => observations::parse_hourly(source_id, file_name, raw),
        SourceKind::TenMinuteObservations => {
            observations::parse_ten_minute(source_id, file_name, raw)
        }
        SourceKind::Synop => synop::parse(source_id, file_name, raw),
    }
}
