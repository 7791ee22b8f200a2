//! Station observation ZIP parsers (hourly and 10-minute products).
//!
//! Each archive covers a single station: a geography metadata member with
//! the station's dated location history, and exactly one `produkt_*.txt`
//! member with the measurement rows. Values use `-999` as the missing
//! sentinel and are converted to canonical units here.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use tracing::debug;

use met_common::{Element, Record, Station};

use crate::error::ParseError;
use crate::tables::{parse_compact_timestamp, ColumnSpec};
use crate::ParseOutcome;

/// Hourly product columns (`MESS_DATUM` as `YYYYMMDDHH`).
const HOURLY_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::scaled("TT_TU", Element::Temperature, 1.0, 273.15),
    ColumnSpec::direct("R1", Element::Precipitation),
    ColumnSpec::direct("F", Element::WindSpeed),
    ColumnSpec::direct("D", Element::WindDirection),
    ColumnSpec::scaled("SD_SO", Element::Sunshine, 60.0, 0.0),
    ColumnSpec::scaled("P0", Element::PressureMsl, 100.0, 0.0),
];

/// 10-minute product columns (`MESS_DATUM` as `YYYYMMDDHHMM`).
const TEN_MINUTE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::scaled("TT_10", Element::Temperature, 1.0, 273.15),
    ColumnSpec::direct("RWS_10", Element::Precipitation),
    ColumnSpec::direct("FF_10", Element::WindSpeed),
    ColumnSpec::direct("DD_10", Element::WindDirection),
    ColumnSpec::scaled("SD_10", Element::Sunshine, 3600.0, 0.0),
    ColumnSpec::scaled("PP_10", Element::PressureMsl, 100.0, 0.0),
];

const MISSING_SENTINEL: f64 = -999.0;

const GEOGRAPHY_PREFIX: &str = "Metadaten_Geographie_";

pub fn parse_hourly(
    source_id: &str,
    file_name: &str,
    raw: &[u8],
) -> Result<ParseOutcome, ParseError> {
    parse_archive(source_id, file_name, raw, HOURLY_COLUMNS, false)
}

pub fn parse_ten_minute(
    source_id: &str,
    file_name: &str,
    raw: &[u8],
) -> Result<ParseOutcome, ParseError> {
    parse_archive(source_id, file_name, raw, TEN_MINUTE_COLUMNS, true)
}

/// A dated location entry from the geography metadata.
#[derive(Debug, Clone, Copy)]
struct LocationEntry {
    latitude: f64,
    longitude: f64,
    elevation: f64,
}

fn parse_archive(
    source_id: &str,
    file_name: &str,
    raw: &[u8],
    columns: &[ColumnSpec],
    with_minutes: bool,
) -> Result<ParseOutcome, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw))
        .map_err(|e| ParseError::malformed(file_name, format!("not a ZIP archive: {e}")))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let station_id = station_id_from_names(&names)
        .ok_or_else(|| ParseError::malformed(file_name, "no geography metadata member"))?;

    let meta_name = format!("{GEOGRAPHY_PREFIX}{station_id}.txt");
    let meta_text = read_member(&mut archive, &meta_name, file_name)?;
    let (history, station_name) = parse_location_history(&meta_text, file_name)?;

    let product_names: Vec<&String> = names.iter().filter(|n| n.starts_with("produkt_")).collect();
    if product_names.len() != 1 {
        return Err(ParseError::malformed(
            file_name,
            format!("expected one product member, found {}", product_names.len()),
        ));
    }
    let product_text = read_member(&mut archive, product_names[0], file_name)?;

    let mut outcome = parse_product(
        source_id,
        file_name,
        &station_id,
        &product_text,
        columns,
        with_minutes,
    )?;

    // The newest dated location entry describes the station today; the
    // earliest opens its validity window.
    if let (Some(&first_seen), Some(&newest)) =
        (history.keys().next(), history.values().next_back())
    {
        outcome.stations.push(Station {
            station_id: station_id.clone(),
            name: station_name,
            latitude: Some(newest.latitude),
            longitude: Some(newest.longitude),
            elevation: Some(newest.elevation),
            active_from: Some(first_seen),
            active_to: None,
        });
    }

    debug!(
        file = %file_name,
        station = %station_id,
        records = outcome.records.len(),
        skipped = outcome.skipped_rows,
        "Parsed observation archive"
    );

    Ok(outcome)
}

fn station_id_from_names(names: &[String]) -> Option<String> {
    names.iter().find_map(|name| {
        let id = name
            .strip_prefix(GEOGRAPHY_PREFIX)?
            .strip_suffix(".txt")?;
        if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    })
}

fn read_member(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    member_name: &str,
    file_name: &str,
) -> Result<String, ParseError> {
    let mut member = archive.by_name(member_name).map_err(|e| {
        ParseError::malformed(file_name, format!("missing member {member_name}: {e}"))
    })?;
    let mut bytes = Vec::new();
    member.read_to_end(&mut bytes).map_err(|e| {
        ParseError::malformed(file_name, format!("unreadable member {member_name}: {e}"))
    })?;
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
    Ok(text.into_owned())
}

/// Parse the dated location history, keyed by the date each location took
/// effect. Also picks up the station name when the metadata carries one.
fn parse_location_history(
    text: &str,
    file_name: &str,
) -> Result<(BTreeMap<DateTime<Utc>, LocationEntry>, Option<String>), ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ParseError::malformed(file_name, format!("bad geography metadata: {e}")))?
        .clone();
    let date_idx = headers.iter().position(|h| h == "von_datum");
    let lat_idx = headers.iter().position(|h| h == "Geogr.Breite");
    let lon_idx = headers.iter().position(|h| h == "Geogr.Laenge");
    let elev_idx = headers.iter().position(|h| h == "Stationshoehe");
    let name_idx = headers.iter().position(|h| h == "Stationsname");

    let (Some(date_idx), Some(lat_idx), Some(lon_idx), Some(elev_idx)) =
        (date_idx, lat_idx, lon_idx, elev_idx)
    else {
        return Err(ParseError::malformed(
            file_name,
            "geography metadata misses required columns",
        ));
    };

    let mut history = BTreeMap::new();
    let mut station_name = None;

    for row in reader.records() {
        let Ok(row) = row else { continue };
        let parsed = (|| {
            let date = parse_compact_timestamp(&format!("{}00", row.get(date_idx)?), false)?;
            let latitude: f64 = row.get(lat_idx)?.parse().ok()?;
            let longitude: f64 = row.get(lon_idx)?.parse().ok()?;
            let elevation: f64 = row.get(elev_idx)?.parse().ok()?;
            Some((
                date,
                LocationEntry {
                    latitude,
                    longitude,
                    elevation,
                },
            ))
        })();
        if let Some((date, entry)) = parsed {
            history.insert(date, entry);
        }
        if station_name.is_none() {
            station_name = name_idx
                .and_then(|i| row.get(i))
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }
    }

    if history.is_empty() {
        return Err(ParseError::malformed(file_name, "empty location history"));
    }
    Ok((history, station_name))
}

fn parse_product(
    source_id: &str,
    file_name: &str,
    station_id: &str,
    text: &str,
    columns: &[ColumnSpec],
    with_minutes: bool,
) -> Result<ParseOutcome, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ParseError::malformed(file_name, format!("bad product header: {e}")))?
        .clone();

    let ts_idx = headers
        .iter()
        .position(|h| h == "MESS_DATUM")
        .ok_or_else(|| ParseError::malformed(file_name, "product misses MESS_DATUM column"))?;

    let active: Vec<(usize, &ColumnSpec)> = columns
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
            "product carries no known element columns",
        ));
    }

    let mut outcome = ParseOutcome::default();

    for row in reader.records() {
        let Ok(row) = row else {
            outcome.skipped_rows += 1;
            continue;
        };
        let timestamp = row
            .get(ts_idx)
            .and_then(|raw| parse_compact_timestamp(raw, with_minutes));
        let Some(timestamp) = timestamp else {
            outcome.skipped_rows += 1;
            continue;
        };

        let mut row_bad = false;
        for (idx, spec) in &active {
            let Some(cell) = row.get(*idx) else { continue };
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(raw) if raw == MISSING_SENTINEL => {}
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
    }

    Ok(outcome)
}
