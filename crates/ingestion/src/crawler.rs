//! Crawler: download new files, parse them, and hand batches to the merge
//! engine.

use std::sync::Arc;

use tracing::{error, info, warn};

use dwd_parsers::{parse, ParseError};
use met_common::{FileRef, MetError, MetResult};
use storage::Repository;

use crate::catalog::SourceCatalog;
use crate::merge::MergeEngine;

/// Summary of one crawl run over a source.
#[derive(Debug, Default, Clone)]
pub struct CrawlReport {
    pub files_fetched: usize,
    pub records_committed: u64,
    pub rows_skipped: u64,
    /// Files that failed structural parsing and were marked seen.
    pub files_failed: usize,
}

pub struct Crawler<R: Repository> {
    catalog: SourceCatalog,
    repo: Arc<R>,
    merge: MergeEngine<R>,
}

impl<R: Repository> Crawler<R> {
    pub fn new(catalog: SourceCatalog, repo: Arc<R>) -> Self {
        let merge = MergeEngine::new(repo.clone());
        Self {
            catalog,
            repo,
            merge,
        }
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// Run one crawl for a source: list new files, download, parse, and
    /// commit each file as a single transaction.
    ///
    /// Transient fetch failures propagate so the work queue retries with
    /// backoff; a file already committed before the failure stays
    /// committed, and redelivery is safe because every commit is an
    /// idempotent upsert. A file that can never parse is marked seen
    /// instead of failing the job.
    pub async fn crawl_source(&self, source_id: &str) -> MetResult<CrawlReport> {
        let source = self.catalog.get(source_id)?;
        let files = self.catalog.list_new(source, self.repo.as_ref()).await?;

        let mut report = CrawlReport::default();
        if files.is_empty() {
            info!(source = %source_id, "No new files");
            return Ok(report);
        }
        info!(source = %source_id, count = files.len(), "Found new files");

        for file in files {
            let bytes = self.download(&file).await?;
            report.files_fetched += 1;

            match parse(source.descriptor.kind, &file.source_id, &file.path, &bytes) {
                Ok(outcome) => {
                    if outcome.skipped_rows > 0 {
                        warn!(
                            source = %file.source_id,
                            file = %file.path,
                            skipped = outcome.skipped_rows,
                            "Skipped unparseable rows"
                        );
                    }
                    report.rows_skipped += outcome.skipped_rows;
                    report.records_committed += self.merge.merge(outcome, &file).await?;
                }
                Err(ParseError::Malformed { ref detail, .. }) => {
                    // The file will never parse; mark it seen so it is not
                    // retried forever, but keep it operator-visible.
                    error!(
                        source = %file.source_id,
                        file = %file.path,
                        detail = %detail,
                        "File failed structural parse"
                    );
                    self.repo.mark_file_seen(&file, 0).await?;
                    report.files_failed += 1;
                }
            }
        }

        info!(
            source = %source_id,
            fetched = report.files_fetched,
            committed = report.records_committed,
            skipped_rows = report.rows_skipped,
            failed_files = report.files_failed,
            "Crawl complete"
        );
        Ok(report)
    }

    async fn download(&self, file: &FileRef) -> MetResult<Vec<u8>> {
        let response = self
            .catalog
            .client()
            .get(&file.path)
            .send()
            .await
            .map_err(|e| MetError::TransientFetch(format!("GET {} failed: {}", file.path, e)))?;

        if !response.status().is_success() {
            return Err(MetError::TransientFetch(format!(
                "GET {} returned {}",
                file.path,
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            MetError::TransientFetch(format!("Read of {} failed: {}", file.path, e))
        })?;
        Ok(bytes.to_vec())
    }
}
