//! End-to-end pipeline tests: parse real archive bytes, merge them through
//! the engine, and answer queries over the stored records.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use dwd_parsers::parse;
use ingestion::MergeEngine;
use met_common::{Element, FileRef, MetResult, Record, RecordKey, SourceKind, Station};
use met_query::{Location, QueryConfig, QueryService};
use storage::repository::pick_nearest;
use storage::Repository;

/// Repository double backed by hash maps, mirroring the Postgres upsert
/// semantics closely enough for pipeline tests.
#[derive(Default)]
struct InMemoryRepository {
    records: Mutex<HashMap<RecordKey, Record>>,
    stations: Mutex<HashMap<String, Station>>,
    seen: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryRepository {
    fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn commit_batch(
        &self,
        records: &[Record],
        stations: &[Station],
        file: &FileRef,
        skipped_rows: u64,
    ) -> MetResult<u64> {
        for station in stations {
            self.upsert_station(station).await?;
        }
        let written = self.upsert_records(records).await?;
        self.mark_file_seen(file, skipped_rows).await?;
        Ok(written)
    }

    async fn upsert_records(&self, records: &[Record]) -> MetResult<u64> {
        let mut map = self.records.lock().unwrap();
        for record in records {
            map.insert(record.key(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn upsert_station(&self, station: &Station) -> MetResult<()> {
        let mut map = self.stations.lock().unwrap();
        map.entry(station.station_id.clone())
            .and_modify(|existing| {
                if existing.name.is_none() {
                    existing.name = station.name.clone();
                }
                if existing.latitude.is_none() {
                    existing.latitude = station.latitude;
                }
                if existing.longitude.is_none() {
                    existing.longitude = station.longitude;
                }
                if existing.elevation.is_none() {
                    existing.elevation = station.elevation;
                }
                existing.active_from = match (existing.active_from, station.active_from) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    _ => None,
                };
                existing.active_to = match (existing.active_to, station.active_to) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            })
            .or_insert_with(|| station.clone());
        Ok(())
    }

    async fn is_file_seen(&self, file: &FileRef) -> MetResult<bool> {
        let seen = self.seen.lock().unwrap();
        Ok(seen
            .get(&(file.source_id.clone(), file.path.clone()))
            .map_or(false, |fingerprint| *fingerprint == file.fingerprint))
    }

    async fn mark_file_seen(&self, file: &FileRef, _skipped_rows: u64) -> MetResult<()> {
        let mut seen = self.seen.lock().unwrap();
        seen.insert(
            (file.source_id.clone(), file.path.clone()),
            file.fingerprint.clone(),
        );
        Ok(())
    }

    async fn query_range(
        &self,
        station_id: &str,
        element: Element,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetResult<Vec<Record>> {
        let map = self.records.lock().unwrap();
        let mut records: Vec<Record> = map
            .values()
            .filter(|r| {
                r.station_id == station_id
                    && r.element == element
                    && r.timestamp >= from
                    && r.timestamp <= to
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(records)
    }

    async fn nearest_station(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
        tie_radius_km: f64,
    ) -> MetResult<Option<Station>> {
        let stations: Vec<Station> = self
            .stations
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_active_at(at))
            .cloned()
            .collect();
        Ok(pick_nearest(
            stations.into_iter(),
            latitude,
            longitude,
            tie_radius_km,
        ))
    }
}

fn archive(members: &[(String, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        writer
            .start_file(name.as_str(), zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn ten_minute_zip(station_id: &str, lat: f64, lon: f64, temperature: f64) -> Vec<u8> {
    let geography = format!(
        "Stations_id;Stationshoehe;Geogr.Breite;Geogr.Laenge;von_datum;bis_datum;Stationsname\n\
         {id};54.0;{lat};{lon};20200101;;Teststation\n",
        id = station_id.trim_start_matches('0'),
        lat = lat,
        lon = lon,
    );
    let product = format!(
        "STATIONS_ID;MESS_DATUM;QN;TT_10;eor\n\
         {id};202306011200;3;{temperature};eor\n",
        id = station_id.trim_start_matches('0'),
        temperature = temperature,
    );
    archive(&[
        (format!("Metadaten_Geographie_{station_id}.txt"), geography),
        (
            format!("produkt_zehn_min_tu_20230101_20231231_{station_id}.txt"),
            product,
        ),
    ])
}

fn file_ref(source_id: &str, path: &str, fingerprint: &str) -> FileRef {
    FileRef {
        source_id: source_id.to_string(),
        path: path.to_string(),
        fingerprint: fingerprint.to_string(),
    }
}

async fn ingest(
    repo: &Arc<InMemoryRepository>,
    kind: SourceKind,
    file: &FileRef,
    raw: &[u8],
) -> u64 {
    let outcome = parse(kind, &file.source_id, &file.path, raw).unwrap();
    MergeEngine::new(repo.clone())
        .merge(outcome, file)
        .await
        .unwrap()
}

fn query_service(repo: &Arc<InMemoryRepository>) -> QueryService<InMemoryRepository> {
    let priorities = HashMap::from([
        ("synop".to_string(), 30),
        ("obs_10min".to_string(), 10),
    ]);
    QueryService::new(repo.clone(), priorities, QueryConfig::default())
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_higher_priority_source_wins_the_query() {
    let repo = Arc::new(InMemoryRepository::default());

    // Low-priority 10-minute observation: 15.0 degC -> 288.15 K.
    let obs_file = file_ref("obs_10min", "obs/00001.zip", "v1");
    let raw = ten_minute_zip("00001", 52.52, 13.405, 15.0);
    ingest(&repo, SourceKind::TenMinuteObservations, &obs_file, &raw).await;

    // Higher-priority synoptic report for the same key: 289.05 K.
    let synop_file = file_ref("synop", "synop/202306011200.csv", "v1");
    let report =
        "station_id;timestamp;temperature;pressure_msl\n00001;202306011200;15.9;1013.2\n";
    ingest(&repo, SourceKind::Synop, &synop_file, report.as_bytes()).await;

    let series = query_service(&repo)
        .series(
            &Location::Station("00001".to_string()),
            Element::Temperature,
            noon(),
            noon(),
            Duration::minutes(10),
        )
        .await
        .unwrap();

    assert_eq!(series.points.len(), 1);
    assert_eq!(series.points[0].value, 289.05);
    assert_eq!(series.points[0].source_used, "synop");
    assert!(!series.points[0].interpolated);
}

#[tokio::test]
async fn test_reingesting_the_same_file_is_a_noop() {
    let repo = Arc::new(InMemoryRepository::default());
    let file = file_ref("obs_10min", "obs/00001.zip", "v1");
    let raw = ten_minute_zip("00001", 52.52, 13.405, 15.0);

    ingest(&repo, SourceKind::TenMinuteObservations, &file, &raw).await;
    let count_after_first = repo.record_count();

    assert!(repo.is_file_seen(&file).await.unwrap());

    ingest(&repo, SourceKind::TenMinuteObservations, &file, &raw).await;
    assert_eq!(repo.record_count(), count_after_first);
}

#[tokio::test]
async fn test_changed_fingerprint_supersedes_stored_values() {
    let repo = Arc::new(InMemoryRepository::default());

    let file_v1 = file_ref("obs_10min", "obs/00001.zip", "v1");
    ingest(
        &repo,
        SourceKind::TenMinuteObservations,
        &file_v1,
        &ten_minute_zip("00001", 52.52, 13.405, 15.0),
    )
    .await;

    // Same path, new content: the old fingerprint no longer matches and
    // reprocessing overwrites the covered keys.
    let file_v2 = file_ref("obs_10min", "obs/00001.zip", "v2");
    assert!(!repo.is_file_seen(&file_v2).await.unwrap());
    ingest(
        &repo,
        SourceKind::TenMinuteObservations,
        &file_v2,
        &ten_minute_zip("00001", 52.52, 13.405, 16.0),
    )
    .await;

    assert_eq!(repo.record_count(), 1);
    let series = query_service(&repo)
        .series(
            &Location::Station("00001".to_string()),
            Element::Temperature,
            noon(),
            noon(),
            Duration::minutes(10),
        )
        .await
        .unwrap();
    assert_eq!(series.points[0].value, 289.15);
}

#[tokio::test]
async fn test_point_query_falls_back_to_single_nearest_station() {
    let repo = Arc::new(InMemoryRepository::default());

    // Berlin-ish and Hamburg-ish stations with different readings.
    ingest(
        &repo,
        SourceKind::TenMinuteObservations,
        &file_ref("obs_10min", "obs/00001.zip", "v1"),
        &ten_minute_zip("00001", 52.52, 13.405, 15.0),
    )
    .await;
    ingest(
        &repo,
        SourceKind::TenMinuteObservations,
        &file_ref("obs_10min", "obs/00002.zip", "v1"),
        &ten_minute_zip("00002", 53.551, 9.994, 20.0),
    )
    .await;

    let series = query_service(&repo)
        .series(
            &Location::Point {
                latitude: 52.4,
                longitude: 13.5,
            },
            Element::Temperature,
            noon(),
            noon(),
            Duration::minutes(10),
        )
        .await
        .unwrap();

    // The nearer station's value, never a blend of the two.
    assert_eq!(series.station_id, "00001");
    assert_eq!(series.points.len(), 1);
    assert_eq!(series.points[0].value, 288.15);
}
