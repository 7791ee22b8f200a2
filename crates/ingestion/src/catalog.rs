//! Source catalog: the static source table resolved at construction, plus
//! upstream listing against the seen-file ledger.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::{header, Client};
use tracing::{debug, warn};

use met_common::{FileRef, MetError, MetResult, Source};
use storage::Repository;

use crate::config::AppConfig;

const MAX_CONCURRENT_PROBES: usize = 4;

/// A configured source with its network location. The parser for its kind
/// is fixed at build time; there is no runtime format discovery.
#[derive(Debug, Clone)]
pub struct ConfiguredSource {
    pub descriptor: Source,
    pub index_url: String,
    pub file_pattern: String,
}

/// Enumerates upstream file locations and decides what is new.
pub struct SourceCatalog {
    sources: Vec<ConfiguredSource>,
    client: Client,
}

impl SourceCatalog {
    pub fn new(config: &AppConfig) -> MetResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ingest.request_timeout_secs))
            .build()
            .map_err(|e| MetError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        let sources = config
            .enabled_sources()
            .map(|entry| ConfiguredSource {
                descriptor: Source {
                    id: entry.id.clone(),
                    kind: entry.kind,
                    priority: entry.priority,
                    coverage: entry.coverage,
                },
                index_url: entry.index_url.clone(),
                file_pattern: entry.file_pattern.clone(),
            })
            .collect();

        Ok(Self { sources, client })
    }

    pub fn sources(&self) -> &[ConfiguredSource] {
        &self.sources
    }

    pub fn get(&self, source_id: &str) -> MetResult<&ConfiguredSource> {
        self.sources
            .iter()
            .find(|s| s.descriptor.id == source_id)
            .ok_or_else(|| MetError::UnknownSource(source_id.to_string()))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// List files whose fingerprint is absent from or changed in the
    /// seen-file ledger. Side-effect-free; safe to call concurrently for
    /// different sources.
    pub async fn list_new(
        &self,
        source: &ConfiguredSource,
        repo: &dyn Repository,
    ) -> MetResult<Vec<FileRef>> {
        let index = self
            .client
            .get(&source.index_url)
            .send()
            .await
            .map_err(|e| {
                MetError::TransientFetch(format!("GET {} failed: {}", source.index_url, e))
            })?
            .error_for_status()
            .map_err(|e| {
                MetError::TransientFetch(format!("GET {} failed: {}", source.index_url, e))
            })?
            .text()
            .await
            .map_err(|e| {
                MetError::TransientFetch(format!("Read of {} failed: {}", source.index_url, e))
            })?;

        let candidates: Vec<String> = extract_links(&index)
            .into_iter()
            .filter(|href| href.contains(&source.file_pattern))
            .map(|href| resolve_url(&source.index_url, &href))
            .collect();

        // Probe fingerprints concurrently; `buffered` keeps listing order
        // so repeated listings stay deterministic.
        let probed: Vec<(String, MetResult<String>)> = stream::iter(candidates)
            .map(|url| async move {
                let fingerprint = self.head_fingerprint(&url).await;
                (url, fingerprint)
            })
            .buffered(MAX_CONCURRENT_PROBES)
            .collect()
            .await;

        let mut new_files = Vec::new();
        for (url, fingerprint) in probed {
            let fingerprint = match fingerprint {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    // One unreachable file should not block the rest of the
                    // listing; it will be fingerprinted on the next cycle.
                    warn!(url = %url, error = %e, "Fingerprint probe failed");
                    continue;
                }
            };
            let file = FileRef {
                source_id: source.descriptor.id.clone(),
                path: url,
                fingerprint,
            };
            if !repo.is_file_seen(&file).await? {
                new_files.push(file);
            }
        }

        debug!(
            source = %source.descriptor.id,
            new_files = new_files.len(),
            "Listed upstream index"
        );
        Ok(new_files)
    }

    /// Probe a file's identity with a HEAD request.
    async fn head_fingerprint(&self, url: &str) -> MetResult<String> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| MetError::TransientFetch(format!("HEAD {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(MetError::TransientFetch(format!(
                "HEAD {} returned {}",
                url,
                response.status()
            )));
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(fingerprint_from_headers(
            header_value(header::ETAG).as_deref(),
            header_value(header::CONTENT_LENGTH).as_deref(),
            header_value(header::LAST_MODIFIED).as_deref(),
        ))
    }
}

/// Extract href targets from an HTML directory index page.
fn extract_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = html;
    while let Some(pos) = rest.find("href=\"") {
        rest = &rest[pos + 6..];
        let Some(end) = rest.find('"') else { break };
        let href = &rest[..end];
        rest = &rest[end..];

        if href.is_empty()
            || href == "../"
            || href.starts_with('?')
            || href.starts_with('#')
            || href.ends_with('/')
        {
            continue;
        }
        links.push(href.to_string());
    }
    links
}

/// Join a listed href against the index URL.
fn resolve_url(index_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            index_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

/// Cheap file identity: the upstream ETag when present, else size plus
/// modification marker.
fn fingerprint_from_headers(
    etag: Option<&str>,
    content_length: Option<&str>,
    last_modified: Option<&str>,
) -> String {
    if let Some(etag) = etag {
        return etag.trim_matches('"').to_string();
    }
    format!(
        "{}:{}",
        content_length.unwrap_or("0"),
        last_modified.unwrap_or("unknown")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<html><head><title>Index of /recent</title></head><body>
<h1>Index of /recent</h1><pre><a href="../">../</a>
<a href="stundenwerte_TU_04911_akt.zip">stundenwerte_TU_04911_akt.zip</a>  02-Jun-2023 07:12  123K
<a href="stundenwerte_TU_00044_akt.zip">stundenwerte_TU_00044_akt.zip</a>  02-Jun-2023 07:12  119K
<a href="BESCHREIBUNG_stundenwerte_TU.pdf">BESCHREIBUNG_stundenwerte_TU.pdf</a>
<a href="?C=M;O=A">sort</a>
<a href="subdir/">subdir/</a>
</pre></body></html>"#;

    #[test]
    fn test_extract_links_skips_navigation() {
        let links = extract_links(INDEX);
        assert_eq!(
            links,
            vec![
                "stundenwerte_TU_04911_akt.zip",
                "stundenwerte_TU_00044_akt.zip",
                "BESCHREIBUNG_stundenwerte_TU.pdf",
            ]
        );
    }

    #[test]
    fn test_resolve_url_joins_relative() {
        assert_eq!(
            resolve_url("https://example.org/recent/", "file.zip"),
            "https://example.org/recent/file.zip"
        );
        assert_eq!(
            resolve_url("https://example.org/recent", "file.zip"),
            "https://example.org/recent/file.zip"
        );
    }

    #[test]
    fn test_resolve_url_keeps_absolute() {
        assert_eq!(
            resolve_url("https://example.org/recent/", "https://cdn.example.org/file.zip"),
            "https://cdn.example.org/file.zip"
        );
    }

    #[test]
    fn test_fingerprint_prefers_etag() {
        assert_eq!(
            fingerprint_from_headers(Some("\"abc123\""), Some("10"), Some("x")),
            "abc123"
        );
        assert_eq!(
            fingerprint_from_headers(None, Some("123456"), Some("Fri, 02 Jun 2023 07:12:00 GMT")),
            "123456:Fri, 02 Jun 2023 07:12:00 GMT"
        );
    }
}
