//! Parser error type.

use thiserror::Error;

/// Errors raised while parsing an upstream file.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Structural failure: the file will never parse and should be marked
    /// seen rather than retried.
    #[error("Malformed file {file}: {detail}")]
    Malformed { file: String, detail: String },
}

impl ParseError {
    pub fn malformed(file: &str, detail: impl Into<String>) -> Self {
        ParseError::Malformed {
            file: file.to_string(),
            detail: detail.into(),
        }
    }
}
