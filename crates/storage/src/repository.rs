//! Canonical record repository using PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;

use met_common::geo::haversine_km;
use met_common::{Element, FileRef, MetError, MetResult, Record, Station};

/// Narrow persistence interface consumed by the ingestion pipeline and the
/// query service. All operations are safe under concurrent invocation from
/// independent source pipelines.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Upsert a parsed batch and record its file as seen, atomically.
    ///
    /// Either the records, stations, and seen-marker all persist, or none
    /// do. Returns the number of records written.
    async fn commit_batch(
        &self,
        records: &[Record],
        stations: &[Station],
        file: &FileRef,
        skipped_rows: u64,
    ) -> MetResult<u64>;

    /// Idempotent record upsert keyed on `(station, timestamp, element,
    /// source)`.
    async fn upsert_records(&self, records: &[Record]) -> MetResult<u64>;

    /// Create a station on first sighting; later sightings may only widen
    /// the validity window and fill in missing fields.
    async fn upsert_station(&self, station: &Station) -> MetResult<()>;

    /// Whether this exact path and fingerprint has already been processed.
    async fn is_file_seen(&self, file: &FileRef) -> MetResult<bool>;

    /// Record a file as processed under its current fingerprint.
    async fn mark_file_seen(&self, file: &FileRef, skipped_rows: u64) -> MetResult<()>;

    /// All stored records for one station and element within the range,
    /// ordered by timestamp then source id.
    async fn query_range(
        &self,
        station_id: &str,
        element: Element,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetResult<Vec<Record>>;

    /// The closest station with known coordinates that is active at `at`.
    /// Stations whose distances differ by less than `tie_radius_km` count
    /// as tied and the tie breaks by station id ascending.
    async fn nearest_station(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
        tie_radius_km: f64,
    ) -> MetResult<Option<Station>>;
}

/// Database connection pool and repository operations.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a new repository connection from a database URL.
    pub async fn connect(database_url: &str) -> MetResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| MetError::Repository(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> MetResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| MetError::Repository(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// The underlying pool, shared with the work queue.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn commit_batch(
        &self,
        records: &[Record],
        stations: &[Station],
        file: &FileRef,
        skipped_rows: u64,
    ) -> MetResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MetError::Repository(format!("Begin failed: {}", e)))?;

        for station in stations {
            bind_station(sqlx::query(UPSERT_STATION_SQL), station)
                .execute(&mut *tx)
                .await
                .map_err(|e| MetError::Repository(format!("Station upsert failed: {}", e)))?;
        }

        let mut written = 0u64;
        for record in records {
            let result = bind_record(sqlx::query(UPSERT_RECORD_SQL), record)
                .execute(&mut *tx)
                .await
                .map_err(|e| MetError::Repository(format!("Record upsert failed: {}", e)))?;
            written += result.rows_affected();
        }

        sqlx::query(MARK_SEEN_SQL)
            .bind(&file.source_id)
            .bind(&file.path)
            .bind(&file.fingerprint)
            .bind(skipped_rows as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetError::Repository(format!("Seen-marker upsert failed: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| MetError::Repository(format!("Commit failed: {}", e)))?;

        debug!(
            source = %file.source_id,
            file = %file.path,
            records = written,
            "Committed file batch"
        );

        Ok(written)
    }

    async fn upsert_records(&self, records: &[Record]) -> MetResult<u64> {
        let mut written = 0u64;
        for record in records {
            let result = bind_record(sqlx::query(UPSERT_RECORD_SQL), record)
                .execute(&self.pool)
                .await
                .map_err(|e| MetError::Repository(format!("Record upsert failed: {}", e)))?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn upsert_station(&self, station: &Station) -> MetResult<()> {
        bind_station(sqlx::query(UPSERT_STATION_SQL), station)
            .execute(&self.pool)
            .await
            .map_err(|e| MetError::Repository(format!("Station upsert failed: {}", e)))?;
        Ok(())
    }

    async fn is_file_seen(&self, file: &FileRef) -> MetResult<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT fingerprint FROM seen_files WHERE source_id = $1 AND file_path = $2",
        )
        .bind(&file.source_id)
        .bind(&file.path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Seen lookup failed: {}", e)))?;

        Ok(row.map_or(false, |(fingerprint,)| fingerprint == file.fingerprint))
    }

    async fn mark_file_seen(&self, file: &FileRef, skipped_rows: u64) -> MetResult<()> {
        sqlx::query(MARK_SEEN_SQL)
            .bind(&file.source_id)
            .bind(&file.path)
            .bind(&file.fingerprint)
            .bind(skipped_rows as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| MetError::Repository(format!("Seen-marker upsert failed: {}", e)))?;
        Ok(())
    }

    async fn query_range(
        &self,
        station_id: &str,
        element: Element,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetResult<Vec<Record>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT station_id, timestamp, element, source_id, value, lead_time_minutes \
             FROM records \
             WHERE station_id = $1 AND element = $2 AND timestamp >= $3 AND timestamp <= $4 \
             ORDER BY timestamp ASC, source_id ASC",
        )
        .bind(station_id)
        .bind(element.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Range query failed: {}", e)))?;

        rows.into_iter().map(Record::try_from).collect()
    }

    async fn nearest_station(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
        tie_radius_km: f64,
    ) -> MetResult<Option<Station>> {
        let rows: Vec<StationRow> = sqlx::query_as(
            "SELECT station_id, name, latitude, longitude, elevation, active_from, active_to \
             FROM stations \
             WHERE latitude IS NOT NULL AND longitude IS NOT NULL \
               AND (active_from IS NULL OR active_from <= $1) \
               AND (active_to IS NULL OR active_to >= $1)",
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MetError::Repository(format!("Station query failed: {}", e)))?;

        let stations = rows.into_iter().map(Station::from);
        Ok(pick_nearest(stations, latitude, longitude, tie_radius_km))
    }
}

/// Select the closest station, breaking near-ties by station id ascending.
pub fn pick_nearest(
    stations: impl Iterator<Item = Station>,
    latitude: f64,
    longitude: f64,
    tie_radius_km: f64,
) -> Option<Station> {
    let mut candidates: Vec<(f64, Station)> = stations
        .filter_map(|station| {
            let (Some(lat), Some(lon)) = (station.latitude, station.longitude) else {
                return None;
            };
            Some((haversine_km(latitude, longitude, lat, lon), station))
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.station_id.cmp(&b.1.station_id))
    });

    let closest = candidates.first().map(|(distance, _)| *distance)?;
    candidates
        .into_iter()
        .filter(|(distance, _)| *distance <= closest + tie_radius_km)
        .min_by(|a, b| a.1.station_id.cmp(&b.1.station_id))
        .map(|(_, station)| station)
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    record: &'q Record,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&record.station_id)
        .bind(record.timestamp)
        .bind(record.element.as_str())
        .bind(&record.source_id)
        .bind(record.value)
        .bind(record.lead_time.map(|d| d.num_minutes() as i32))
}

fn bind_station<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    station: &'q Station,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&station.station_id)
        .bind(&station.name)
        .bind(station.latitude)
        .bind(station.longitude)
        .bind(station.elevation)
        .bind(station.active_from)
        .bind(station.active_to)
}

/// Internal row type for record queries.
#[derive(FromRow)]
struct RecordRow {
    station_id: String,
    timestamp: DateTime<Utc>,
    element: String,
    source_id: String,
    value: f64,
    lead_time_minutes: Option<i32>,
}

impl TryFrom<RecordRow> for Record {
    type Error = MetError;

    fn try_from(row: RecordRow) -> MetResult<Record> {
        let element = row
            .element
            .parse()
            .map_err(|_| MetError::Repository(format!("Unexpected element '{}'", row.element)))?;
        Ok(Record {
            station_id: row.station_id,
            timestamp: row.timestamp,
            element,
            value: row.value,
            source_id: row.source_id,
            lead_time: row
                .lead_time_minutes
                .map(|minutes| Duration::minutes(minutes as i64)),
        })
    }
}

/// Internal row type for station queries.
#[derive(FromRow)]
struct StationRow {
    station_id: String,
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    active_from: Option<DateTime<Utc>>,
    active_to: Option<DateTime<Utc>>,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        Station {
            station_id: row.station_id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            elevation: row.elevation,
            active_from: row.active_from,
            active_to: row.active_to,
        }
    }
}

const UPSERT_RECORD_SQL: &str = "\
INSERT INTO records (station_id, timestamp, element, source_id, value, lead_time_minutes, updated_at) \
VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
ON CONFLICT (station_id, timestamp, element, source_id) \
DO UPDATE SET value = EXCLUDED.value, lead_time_minutes = EXCLUDED.lead_time_minutes, updated_at = NOW()";

const UPSERT_STATION_SQL: &str = "\
INSERT INTO stations (station_id, name, latitude, longitude, elevation, active_from, active_to) \
VALUES ($1, $2, $3, $4, $5, $6, $7) \
ON CONFLICT (station_id) DO UPDATE SET \
    name = COALESCE(stations.name, EXCLUDED.name), \
    latitude = COALESCE(stations.latitude, EXCLUDED.latitude), \
    longitude = COALESCE(stations.longitude, EXCLUDED.longitude), \
    elevation = COALESCE(stations.elevation, EXCLUDED.elevation), \
    active_from = CASE \
        WHEN stations.active_from IS NULL OR EXCLUDED.active_from IS NULL THEN NULL \
        ELSE LEAST(stations.active_from, EXCLUDED.active_from) \
    END, \
    active_to = CASE \
        WHEN stations.active_to IS NULL OR EXCLUDED.active_to IS NULL THEN NULL \
        ELSE GREATEST(stations.active_to, EXCLUDED.active_to) \
    END";

const MARK_SEEN_SQL: &str = "\
INSERT INTO seen_files (source_id, file_path, fingerprint, skipped_rows, processed_at) \
VALUES ($1, $2, $3, $4, NOW()) \
ON CONFLICT (source_id, file_path) \
DO UPDATE SET fingerprint = EXCLUDED.fingerprint, skipped_rows = EXCLUDED.skipped_rows, processed_at = NOW()";

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stations (
    station_id TEXT PRIMARY KEY,
    name TEXT,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    elevation DOUBLE PRECISION,
    active_from TIMESTAMPTZ,
    active_to TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS records (
    station_id TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    element TEXT NOT NULL,
    source_id TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    lead_time_minutes INTEGER,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    PRIMARY KEY (station_id, timestamp, element, source_id)
);

CREATE INDEX IF NOT EXISTS idx_records_station_element_time ON records(station_id, element, timestamp);

CREATE TABLE IF NOT EXISTS seen_files (
    source_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    skipped_rows BIGINT NOT NULL DEFAULT 0,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    PRIMARY KEY (source_id, file_path)
);

CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    source_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    run_after TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    lease_expires_at TIMESTAMPTZ,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_source ON jobs(source_id) WHERE status IN ('pending', 'leased');
CREATE INDEX IF NOT EXISTS idx_jobs_runnable ON jobs(status, run_after);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, lat: f64, lon: f64) -> Station {
        Station {
            station_id: id.to_string(),
            name: None,
            latitude: Some(lat),
            longitude: Some(lon),
            elevation: Some(0.0),
            active_from: None,
            active_to: None,
        }
    }

    #[test]
    fn test_pick_nearest_prefers_closest() {
        let stations = vec![
            station("00002", 52.6, 13.4),
            station("00001", 53.5, 10.0),
        ];
        let winner = pick_nearest(stations.into_iter(), 52.52, 13.405, 0.5).unwrap();
        assert_eq!(winner.station_id, "00002");
    }

    #[test]
    fn test_pick_nearest_tie_breaks_by_station_id() {
        // Same location twice: distances are equal, lower id wins.
        let stations = vec![
            station("00009", 52.52, 13.405),
            station("00003", 52.52, 13.405),
        ];
        let winner = pick_nearest(stations.into_iter(), 52.52, 13.405, 0.5).unwrap();
        assert_eq!(winner.station_id, "00003");
    }

    #[test]
    fn test_pick_nearest_skips_stations_without_coordinates() {
        let bare = Station {
            station_id: "00001".to_string(),
            name: None,
            latitude: None,
            longitude: None,
            elevation: None,
            active_from: None,
            active_to: None,
        };
        assert!(pick_nearest(vec![bare].into_iter(), 52.0, 13.0, 0.5).is_none());
    }
}
