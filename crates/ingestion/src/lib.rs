//! Ingestion pipeline: source catalog, crawler, merge engine, and workers.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod merge;
pub mod worker;

pub use catalog::{ConfiguredSource, SourceCatalog};
pub use config::AppConfig;
pub use crawler::{CrawlReport, Crawler};
pub use merge::MergeEngine;
pub use worker::WorkerPool;
