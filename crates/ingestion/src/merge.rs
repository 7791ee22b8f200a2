//! Merge engine: within-batch dedup plus transactional commit.
//!
//! Cross-source conflicts are not resolved here. Every source's value is
//! stored under its own `(station, timestamp, element, source)` key and the
//! read side picks a winner by priority, so a re-ranking never requires
//! reprocessing history.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use dwd_parsers::ParseOutcome;
use met_common::{FileRef, MetResult, Record, RecordKey};
use storage::Repository;

pub struct MergeEngine<R: Repository> {
    repo: Arc<R>,
}

impl<R: Repository> MergeEngine<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Commit a parsed batch and its seen-marker as one transaction.
    /// Returns the number of records written.
    pub async fn merge(&self, outcome: ParseOutcome, file: &FileRef) -> MetResult<u64> {
        let total = outcome.records.len();
        let records = dedupe(outcome.records);
        if records.len() < total {
            debug!(
                file = %file.path,
                duplicates = total - records.len(),
                "Collapsed duplicate rows within file"
            );
        }
        self.repo
            .commit_batch(&records, &outcome.stations, file, outcome.skipped_rows)
            .await
    }
}

/// Collapse duplicate keys within one batch; the file's later row wins.
/// A source does not conflict with itself across files either - the
/// repository upsert applies the same rule per key.
fn dedupe(records: Vec<Record>) -> Vec<Record> {
    let mut by_key: HashMap<RecordKey, usize> = HashMap::new();
    let mut deduped: Vec<Record> = Vec::with_capacity(records.len());
    for record in records {
        match by_key.get(&record.key()) {
            Some(&idx) => deduped[idx] = record,
            None => {
                by_key.insert(record.key(), deduped.len());
                deduped.push(record);
            }
        }
    }
    deduped
}
