//! Read-side query service: per-instant priority selection, bounded linear
//! gap filling, and nearest-station fallback for point queries.
//!
//! All conflict resolution between sources happens here, at read time. The
//! repository stores every source's value; this crate picks the winner per
//! instant from the static priority table.

pub mod interpolate;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use met_common::{Element, MetError, MetResult, Record};
use storage::Repository;

/// Read-side tuning.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Largest bracket that may be filled by interpolation. A bracket of
    /// exactly this size interpolates; anything wider is a gap.
    pub max_interpolation_gap: Duration,
    /// Stations closer than this to the winner count as tied.
    pub nearest_tie_radius_km: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_interpolation_gap: Duration::minutes(120),
            nearest_tie_radius_km: 1.0,
        }
    }
}

/// Where a query is anchored.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Station(String),
    Point { latitude: f64, longitude: f64 },
}

/// One resolved instant in a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub source_used: String,
    pub interpolated: bool,
}

/// A merged series for one station and element.
#[derive(Debug, Clone)]
pub struct StationSeries {
    pub station_id: String,
    pub element: Element,
    pub points: Vec<SeriesPoint>,
}

pub struct QueryService<R: Repository> {
    repo: Arc<R>,
    priorities: HashMap<String, i32>,
    config: QueryConfig,
}

impl<R: Repository> QueryService<R> {
    pub fn new(repo: Arc<R>, priorities: HashMap<String, i32>, config: QueryConfig) -> Self {
        Self {
            repo,
            priorities,
            config,
        }
    }

    /// Merged series for one element at `step` resolution. Instants with
    /// neither a stored value nor a bracket within the configured gap are
    /// omitted.
    pub async fn series(
        &self,
        location: &Location,
        element: Element,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> MetResult<StationSeries> {
        let station_id = self.resolve_station(location, to).await?;
        self.station_series(station_id, element, from, to, step)
            .await
    }

    /// Merged series for several elements over the same range; the station
    /// is resolved once.
    pub async fn series_set(
        &self,
        location: &Location,
        elements: &[Element],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> MetResult<Vec<StationSeries>> {
        let station_id = self.resolve_station(location, to).await?;
        let mut series = Vec::with_capacity(elements.len());
        for element in elements {
            series.push(
                self.station_series(station_id.clone(), *element, from, to, step)
                    .await?,
            );
        }
        Ok(series)
    }

    async fn station_series(
        &self,
        station_id: String,
        element: Element,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> MetResult<StationSeries> {
        // Widen the fetch so instants near the range edges can still find
        // their brackets.
        let records = self
            .repo
            .query_range(
                &station_id,
                element,
                from - self.config.max_interpolation_gap,
                to + self.config.max_interpolation_gap,
            )
            .await?;

        let merged = merge_by_priority(records, &self.priorities);
        let points = fill_series(&merged, from, to, step, self.config.max_interpolation_gap);

        debug!(
            station = %station_id,
            element = %element,
            stored = merged.len(),
            returned = points.len(),
            "Assembled series"
        );

        Ok(StationSeries {
            station_id,
            element,
            points,
        })
    }

    /// Resolve the query anchor to a station id. Point queries fall back to
    /// the single nearest active station; values are never blended across
    /// stations.
    async fn resolve_station(&self, location: &Location, at: DateTime<Utc>) -> MetResult<String> {
        match location {
            Location::Station(station_id) => Ok(station_id.clone()),
            Location::Point {
                latitude,
                longitude,
            } => self
                .repo
                .nearest_station(*latitude, *longitude, at, self.config.nearest_tie_radius_km)
                .await?
                .map(|station| station.station_id)
                .ok_or(MetError::NoActiveStation {
                    lat: *latitude,
                    lon: *longitude,
                }),
        }
    }
}

/// Pick one record per timestamp: highest static priority wins, ties break
/// by source id ascending. Unknown sources rank at priority 0.
fn merge_by_priority(records: Vec<Record>, priorities: &HashMap<String, i32>) -> Vec<Record> {
    let mut best: BTreeMap<DateTime<Utc>, Record> = BTreeMap::new();
    for record in records {
        match best.get(&record.timestamp) {
            None => {
                best.insert(record.timestamp, record);
            }
            Some(current) => {
                let challenger = priority_of(priorities, &record.source_id);
                let incumbent = priority_of(priorities, &current.source_id);
                if challenger > incumbent
                    || (challenger == incumbent && record.source_id < current.source_id)
                {
                    best.insert(record.timestamp, record);
                }
            }
        }
    }
    best.into_values().collect()
}

fn priority_of(priorities: &HashMap<String, i32>, source_id: &str) -> i32 {
    priorities.get(source_id).copied().unwrap_or(0)
}

/// Produce one point per `step` instant in `[from, to]`: the stored value
/// when one exists, a linear interpolation when bracketed within
/// `max_gap`, nothing otherwise. Interpolated points report the earlier
/// bracket's source.
fn fill_series(
    merged: &[Record],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    step: Duration,
    max_gap: Duration,
) -> Vec<SeriesPoint> {
    let mut points = Vec::new();
    if step <= Duration::zero() {
        return points;
    }

    let mut t = from;
    while t <= to {
        match merged.binary_search_by_key(&t, |record| record.timestamp) {
            Ok(idx) => points.push(SeriesPoint {
                timestamp: t,
                value: merged[idx].value,
                source_used: merged[idx].source_id.clone(),
                interpolated: false,
            }),
            Err(idx) => {
                if idx > 0 && idx < merged.len() {
                    let earlier = &merged[idx - 1];
                    let later = &merged[idx];
                    if later.timestamp - earlier.timestamp <= max_gap {
                        points.push(SeriesPoint {
                            timestamp: t,
                            value: interpolate::lerp(
                                earlier.timestamp,
                                earlier.value,
                                later.timestamp,
                                later.value,
                                t,
                            ),
                            source_used: earlier.source_id.clone(),
                            interpolated: true,
                        });
                    }
                }
            }
        }
        t = t + step;
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, hour, minute, 0).unwrap()
    }

    fn record(source_id: &str, timestamp: DateTime<Utc>, value: f64) -> Record {
        Record {
            station_id: "00001".to_string(),
            timestamp,
            element: Element::Temperature,
            value,
            source_id: source_id.to_string(),
            lead_time: None,
        }
    }

    fn priorities() -> HashMap<String, i32> {
        HashMap::from([
            ("synop".to_string(), 30),
            ("obs_hourly".to_string(), 20),
            ("mosmix".to_string(), 10),
        ])
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_order() {
        let forward = merge_by_priority(
            vec![
                record("mosmix", ts(12, 0), 288.15),
                record("synop", ts(12, 0), 289.05),
            ],
            &priorities(),
        );
        let reverse = merge_by_priority(
            vec![
                record("synop", ts(12, 0), 289.05),
                record("mosmix", ts(12, 0), 288.15),
            ],
            &priorities(),
        );

        for merged in [forward, reverse] {
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].value, 289.05);
            assert_eq!(merged[0].source_id, "synop");
        }
    }

    #[test]
    fn test_equal_priority_tie_breaks_by_source_id() {
        let priorities = HashMap::from([("b".to_string(), 5), ("a".to_string(), 5)]);
        let merged = merge_by_priority(
            vec![
                record("b", ts(12, 0), 2.0),
                record("a", ts(12, 0), 1.0),
            ],
            &priorities,
        );
        assert_eq!(merged[0].source_id, "a");
    }

    #[test]
    fn test_exact_values_win_over_interpolation() {
        let merged = vec![
            record("obs_hourly", ts(12, 0), 288.15),
            record("obs_hourly", ts(13, 0), 289.15),
        ];
        let points = fill_series(
            &merged,
            ts(12, 0),
            ts(13, 0),
            Duration::minutes(30),
            Duration::minutes(120),
        );

        assert_eq!(points.len(), 3);
        assert!(!points[0].interpolated);
        assert!(points[1].interpolated);
        assert_eq!(points[1].value, 288.65);
        assert_eq!(points[1].source_used, "obs_hourly");
        assert!(!points[2].interpolated);
    }

    #[test]
    fn test_gap_of_exactly_the_maximum_interpolates() {
        let merged = vec![
            record("obs_hourly", ts(12, 0), 10.0),
            record("obs_hourly", ts(14, 0), 20.0),
        ];
        let points = fill_series(
            &merged,
            ts(13, 0),
            ts(13, 0),
            Duration::minutes(60),
            Duration::minutes(120),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 15.0);
        assert!(points[0].interpolated);
    }

    #[test]
    fn test_gap_one_minute_beyond_the_maximum_is_empty() {
        let merged = vec![
            record("obs_hourly", ts(12, 0), 10.0),
            record("obs_hourly", ts(14, 1), 20.0),
        ];
        let points = fill_series(
            &merged,
            ts(13, 0),
            ts(13, 0),
            Duration::minutes(60),
            Duration::minutes(120),
        );
        assert!(points.is_empty());
    }

    #[test]
    fn test_no_extrapolation_outside_brackets() {
        let merged = vec![record("obs_hourly", ts(12, 0), 10.0)];
        let points = fill_series(
            &merged,
            ts(11, 0),
            ts(13, 0),
            Duration::minutes(60),
            Duration::minutes(120),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, ts(12, 0));
    }

    #[test]
    fn test_interpolation_across_sources_reports_earlier_source() {
        let merged = merge_by_priority(
            vec![
                record("synop", ts(12, 0), 10.0),
                record("obs_hourly", ts(13, 0), 20.0),
            ],
            &priorities(),
        );
        let points = fill_series(
            &merged,
            ts(12, 30),
            ts(12, 30),
            Duration::minutes(30),
            Duration::minutes(120),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].source_used, "synop");
        assert_eq!(points[0].value, 15.0);
    }
}
