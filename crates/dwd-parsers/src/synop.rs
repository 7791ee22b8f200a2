//! Synoptic report parser: one CSV bulletin covering many stations.
//!
//! Unlike the per-station observation archives, a synoptic bulletin is a
//! flat `;`-separated file with one row per station and reporting minute.
//! Values arrive in reporting units (°C, hPa, minutes) and are converted
//! here; an empty cell or `---` marks a missing value.

use tracing::debug;

use met_common::{Element, Record, Station};

use crate::error::ParseError;
use crate::tables::{parse_compact_timestamp, ColumnSpec};
use crate::ParseOutcome;

const COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::scaled("temperature", Element::Temperature, 1.0, 273.15),
    ColumnSpec::direct("wind_direction", Element::WindDirection),
    ColumnSpec::direct("wind_speed", Element::WindSpeed),
    ColumnSpec::direct("precipitation", Element::Precipitation),
    ColumnSpec::scaled("sunshine", Element::Sunshine, 60.0, 0.0),
    ColumnSpec::scaled("pressure_msl", Element::PressureMsl, 100.0, 0.0),
];

const MISSING_SENTINEL: &str = "---";

pub fn parse(source_id: &str, file_name: &str, raw: &[u8]) -> Result<ParseOutcome, ParseError> {
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(raw);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ParseError::malformed(file_name, format!("bad report header: {e}")))?
        .clone();

    let station_idx = headers.iter().position(|h| h == "station_id");
    let ts_idx = headers.iter().position(|h| h == "timestamp");
    let (Some(station_idx), Some(ts_idx)) = (station_idx, ts_idx) else {
        return Err(ParseError::malformed(
            file_name,
            "report misses station_id/timestamp columns",
        ));
    };

    let active: Vec<(usize, &ColumnSpec)> = COLUMNS
        .iter()
        .filter_map(|spec| {
            headers
                .iter()
                .position(|h| h == spec.column)
                .map(|idx| (idx, spec))
        })
        .collect();
    if active.is_empty() {
        return Err(ParseError::malformed(
            file_name,
            "report carries no known element columns",
        ));
    }

    let mut outcome = ParseOutcome::default();
    let mut seen_stations: Vec<String> = Vec::new();

    for row in reader.records() {
        let Ok(row) = row else {
            outcome.skipped_rows += 1;
            continue;
        };

        let station_id = row.get(station_idx).unwrap_or_default();
        let timestamp = row
            .get(ts_idx)
            .and_then(|raw| parse_compact_timestamp(raw, true));
        let (false, Some(timestamp)) = (station_id.is_empty(), timestamp) else {
            outcome.skipped_rows += 1;
            continue;
        };

        let mut row_bad = false;
        for (idx, spec) in &active {
            let Some(cell) = row.get(*idx) else { continue };
            if cell.is_empty() || cell == MISSING_SENTINEL {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(raw) => outcome.records.push(Record {
                    station_id: station_id.to_string(),
                    timestamp,
                    element: spec.element,
                    value: spec.convert(raw),
                    source_id: source_id.to_string(),
                    lead_time: None,
                }),
                Err(_) => row_bad = true,
            }
        }
        if row_bad {
            outcome.skipped_rows += 1;
        }

        if !seen_stations.iter().any(|s| s == station_id) {
            seen_stations.push(station_id.to_string());
        }
    }

    // Synoptic bulletins carry no coordinates; station rows are created
    // bare and filled in when a richer source sights the same station.
    outcome.stations = seen_stations
        .into_iter()
        .map(|station_id| Station {
            station_id,
            name: None,
            latitude: None,
            longitude: None,
            elevation: None,
            active_from: None,
            active_to: None,
        })
        .collect();

    debug!(
        file = %file_name,
        records = outcome.records.len(),
        stations = outcome.stations.len(),
        skipped = outcome.skipped_rows,
        "Parsed synoptic report"
    );

    Ok(outcome)
}
