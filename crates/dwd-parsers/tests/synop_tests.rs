//! Synoptic report parser tests.

use chrono::{DateTime, Utc};

use dwd_parsers::{parse, ParseError};
use met_common::{Element, SourceKind};

const REPORT: &str = "\
station_id;timestamp;temperature;wind_direction;wind_speed;precipitation;sunshine;pressure_msl
00001;202306011200;15.9;330;8.7;0.1;10;990.0
00002;202306011200;---;90;1.5;;0;1006.3
;202306011200;12.0;;;;;
00003;2023060112;12.0;;;;;
";

fn ts(rfc3339: &str) -> DateTime<Utc> {
    rfc3339.parse().unwrap()
}

#[test]
fn test_converts_reporting_units() {
    let outcome = parse(SourceKind::Synop, "synop", "synop_202306011200.csv", REPORT.as_bytes())
        .unwrap();

    let temperature = outcome
        .records
        .iter()
        .find(|r| r.station_id == "00001" && r.element == Element::Temperature)
        .unwrap();
    assert_eq!(temperature.value, 289.05);
    assert_eq!(temperature.timestamp, ts("2023-06-01T12:00:00Z"));
    assert_eq!(temperature.lead_time, None);

    let sunshine = outcome
        .records
        .iter()
        .find(|r| r.station_id == "00001" && r.element == Element::Sunshine)
        .unwrap();
    assert_eq!(sunshine.value, 600.0);

    let pressure = outcome
        .records
        .iter()
        .find(|r| r.station_id == "00001" && r.element == Element::PressureMsl)
        .unwrap();
    assert_eq!(pressure.value, 99000.0);
}

#[test]
fn test_missing_values_leave_gaps() {
    let outcome = parse(SourceKind::Synop, "synop", "synop_202306011200.csv", REPORT.as_bytes())
        .unwrap();

    let second: Vec<_> = outcome
        .records
        .iter()
        .filter(|r| r.station_id == "00002")
        .collect();
    assert_eq!(second.len(), 4);
    assert!(second.iter().all(|r| r.element != Element::Temperature));
    assert!(second.iter().all(|r| r.element != Element::Precipitation));
}

#[test]
fn test_bad_rows_are_counted_not_fatal() {
    let outcome = parse(SourceKind::Synop, "synop", "synop_202306011200.csv", REPORT.as_bytes())
        .unwrap();

    // One row without a station id, one with a short timestamp.
    assert_eq!(outcome.skipped_rows, 2);
    assert_eq!(outcome.stations.len(), 2);
    assert!(outcome.stations.iter().all(|s| s.latitude.is_none()));
}

#[test]
fn test_wrong_header_is_malformed() {
    let err = parse(
        SourceKind::Synop,
        "synop",
        "synop.csv",
        b"a;b;c\n1;2;3\n",
    )
    .unwrap_err();
    assert!(matches!(err, ParseError::Malformed { .. }));
}
