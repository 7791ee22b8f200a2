//! Forecast bulletin parser: KMZ container with a single KML document.
//!
//! The bulletin carries one issue time, a shared list of forecast time
//! steps, and one `Placemark` per station with whitespace-separated value
//! strings per element. Values arrive already in canonical units; `-` marks
//! a missing value.

use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use quick_xml::events::BytesStart;
use quick_xml::Reader;
use tracing::debug;

use met_common::{Element, Record, Station};

use crate::error::ParseError;
use crate::ParseOutcome;

/// KML forecast element names and the canonical elements they map to.
const ELEMENT_NAMES: &[(&str, Element)] = &[
    ("TTT", Element::Temperature),
    ("DD", Element::WindDirection),
    ("FF", Element::WindSpeed),
    ("RR1c", Element::Precipitation),
    ("SunD1", Element::Sunshine),
    ("PPPP", Element::PressureMsl),
];

pub fn parse(source_id: &str, file_name: &str, raw: &[u8]) -> Result<ParseOutcome, ParseError> {
    let kml = extract_kml(file_name, raw)?;
    parse_kml(source_id, file_name, &kml)
}

/// Unpack the KMZ container. Exactly one KML member is a structural
/// invariant of the upstream format.
fn extract_kml(file_name: &str, raw: &[u8]) -> Result<String, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw))
        .map_err(|e| ParseError::malformed(file_name, format!("not a KMZ archive: {e}")))?;

    if archive.len() != 1 {
        return Err(ParseError::malformed(
            file_name,
            format!("expected one KML member, found {}", archive.len()),
        ));
    }

    let mut member = archive
        .by_index(0)
        .map_err(|e| ParseError::malformed(file_name, format!("unreadable KML member: {e}")))?;
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|e| ParseError::malformed(file_name, format!("unreadable KML member: {e}")))?;

    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
    Ok(text.into_owned())
}

#[derive(Default)]
struct PlacemarkState {
    station_id: Option<String>,
    /// (latitude, longitude, elevation)
    coords: Option<(f64, f64, f64)>,
    values: Vec<(Element, Vec<Option<f64>>)>,
}

fn parse_kml(source_id: &str, file_name: &str, kml: &str) -> Result<ParseOutcome, ParseError> {
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(kml);
    let mut outcome = ParseOutcome::default();

    let mut timestamps: Vec<DateTime<Utc>> = Vec::new();
    let mut issue_time: Option<DateTime<Utc>> = None;
    let mut in_time_steps = false;
    let mut placemark: Option<PlacemarkState> = None;
    let mut forecast_element: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::malformed(file_name, format!("invalid KML: {e}")))?;

        match event {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"ForecastTimeSteps" => in_time_steps = true,
                b"TimeStep" if in_time_steps => {
                    let text = read_text(&mut reader, &e, file_name)?;
                    match DateTime::parse_from_rfc3339(text.trim()) {
                        Ok(ts) => timestamps.push(ts.with_timezone(&Utc)),
                        Err(_) => outcome.skipped_rows += 1,
                    }
                }
                b"IssueTime" => {
                    let text = read_text(&mut reader, &e, file_name)?;
                    issue_time = DateTime::parse_from_rfc3339(text.trim())
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc));
                }
                b"Placemark" => placemark = Some(PlacemarkState::default()),
                b"name" => {
                    if let Some(pm) = placemark.as_mut() {
                        if pm.station_id.is_none() {
                            let text = read_text(&mut reader, &e, file_name)?;
                            pm.station_id = Some(text.trim().to_string());
                        }
                    }
                }
                b"coordinates" => {
                    if let Some(pm) = placemark.as_mut() {
                        let text = read_text(&mut reader, &e, file_name)?;
                        pm.coords = parse_coordinates(text.trim());
                        if pm.coords.is_none() {
                            outcome.skipped_rows += 1;
                        }
                    }
                }
                b"Forecast" => forecast_element = element_attr(&e),
                b"value" => {
                    if let (Some(pm), Some(element)) = (placemark.as_mut(), forecast_element) {
                        let text = read_text(&mut reader, &e, file_name)?;
                        let values = text
                            .split_whitespace()
                            .map(|v| if v == "-" { None } else { v.parse().ok() })
                            .collect();
                        pm.values.push((element, values));
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"ForecastTimeSteps" => in_time_steps = false,
                b"Forecast" => forecast_element = None,
                b"Placemark" => {
                    if let Some(pm) = placemark.take() {
                        finish_placemark(source_id, pm, &timestamps, issue_time, &mut outcome);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    if timestamps.is_empty() {
        return Err(ParseError::malformed(file_name, "no forecast time steps"));
    }

    debug!(
        file = %file_name,
        records = outcome.records.len(),
        stations = outcome.stations.len(),
        "Parsed forecast bulletin"
    );

    Ok(outcome)
}

fn finish_placemark(
    source_id: &str,
    pm: PlacemarkState,
    timestamps: &[DateTime<Utc>],
    issue_time: Option<DateTime<Utc>>,
    outcome: &mut ParseOutcome,
) {
    let Some(station_id) = pm.station_id else {
        outcome.skipped_rows += 1;
        return;
    };

    for (element, values) in pm.values {
        if values.len() != timestamps.len() {
            // Value block does not line up with the shared time steps.
            outcome.skipped_rows += 1;
            continue;
        }
        for (timestamp, value) in timestamps.iter().zip(values) {
            if let Some(value) = value {
                outcome.records.push(Record {
                    station_id: station_id.clone(),
                    timestamp: *timestamp,
                    element,
                    value,
                    source_id: source_id.to_string(),
                    lead_time: issue_time.map(|issued| *timestamp - issued),
                });
            }
        }
    }

    outcome.stations.push(Station {
        station_id,
        name: None,
        latitude: pm.coords.map(|c| c.0),
        longitude: pm.coords.map(|c| c.1),
        elevation: pm.coords.map(|c| c.2),
        active_from: None,
        active_to: None,
    });
}

fn read_text<'a>(
    reader: &mut Reader<&'a [u8]>,
    start: &BytesStart<'_>,
    file_name: &str,
) -> Result<std::borrow::Cow<'a, str>, ParseError> {
    reader
        .read_text(start.name())
        .map_err(|e| ParseError::malformed(file_name, format!("invalid KML: {e}")))
}

/// KML coordinates are `longitude,latitude,elevation`.
fn parse_coordinates(text: &str) -> Option<(f64, f64, f64)> {
    let mut parts = text.split(',');
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let elevation: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((lat, lon, elevation))
}

fn element_attr(e: &BytesStart<'_>) -> Option<Element> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"elementName" {
            if let Ok(value) = attr.unescape_value() {
                return ELEMENT_NAMES
                    .iter()
                    .find(|(name, _)| *name == value.as_ref())
                    .map(|(_, element)| *element);
            }
        }
    }
    None
}
