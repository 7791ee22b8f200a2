//! Error types shared across the station-weather crates.

use thiserror::Error;

/// Result type alias using MetError.
pub type MetResult<T> = Result<T, MetError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum MetError {
    // === Ingestion Errors ===
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    // === Query Errors ===
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("No active station near ({lat}, {lon})")]
    NoActiveStation { lat: f64, lon: f64 },

    // === Storage Errors ===
    #[error("Repository error: {0}")]
    Repository(String),

    // === Infrastructure Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
