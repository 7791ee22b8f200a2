//! Shared domain types for the station-weather pipeline.

pub mod element;
pub mod error;
pub mod geo;
pub mod record;
pub mod source;
pub mod station;

pub use element::Element;
pub use error::{MetError, MetResult};
pub use record::{Record, RecordKey};
pub use source::{CoverageWindow, FileRef, Source, SourceKind};
pub use station::Station;
