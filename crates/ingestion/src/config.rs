//! YAML configuration for sources and pipeline tuning.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use met_common::{CoverageWindow, MetError, MetResult, SourceKind};

/// Root configuration loaded from `sources.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub query: QuerySettings,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// Crawl scheduling and retry tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Seconds between poll cycles re-enqueueing every source.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// HTTP request timeout for listing and downloads.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Seconds a claimed job stays unclaimable.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
    /// First retry delay, doubling per attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    /// Retry delay ceiling.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Attempts before a job is parked as dead.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            lease_secs: default_lease(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_attempts: default_max_attempts(),
            workers: default_workers(),
        }
    }
}

fn default_poll_interval() -> u64 {
    900
}

fn default_request_timeout() -> u64 {
    120
}

fn default_lease() -> u64 {
    600
}

fn default_initial_backoff() -> u64 {
    30
}

fn default_max_backoff() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    8
}

fn default_workers() -> usize {
    4
}

/// Read-side tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySettings {
    /// Largest bracket, in minutes, that may be filled by interpolation.
    #[serde(default = "default_max_gap")]
    pub max_interpolation_gap_minutes: i64,
    /// Stations closer than this to the winner count as tied.
    #[serde(default = "default_tie_radius")]
    pub nearest_tie_radius_km: f64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_interpolation_gap_minutes: default_max_gap(),
            nearest_tie_radius_km: default_tie_radius(),
        }
    }
}

fn default_max_gap() -> i64 {
    120
}

fn default_tie_radius() -> f64 {
    1.0
}

/// One upstream feed.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub kind: SourceKind,
    /// Higher wins on conflict; ties break by source id ascending.
    pub priority: i32,
    /// Directory index page listing the source's files.
    pub index_url: String,
    /// Substring a listed file name must contain to belong to this source.
    pub file_pattern: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub coverage: CoverageWindow,
}

fn default_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> MetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MetError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_yaml::from_str(&content).map_err(|e| {
            MetError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> MetResult<()> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(&source.id) {
                return Err(MetError::InvalidConfig(format!(
                    "Duplicate source id: {}",
                    source.id
                )));
            }
        }
        Ok(())
    }

    /// Sources that take part in polling and crawling.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Static priority table for the read side.
    pub fn priorities(&self) -> HashMap<String, i32> {
        self.sources
            .iter()
            .map(|s| (s.id.clone(), s.priority))
            .collect()
    }
}
