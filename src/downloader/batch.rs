// Sequential batch and playlist runner

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::errors::{DownloadError, ExtractionError};
use super::format_selector::QualityChoice;
use super::models::JobReport;
use super::pipeline::DownloadPipeline;
use super::validation::{validate_url, UrlShape};

/// Result of one input line
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    /// Failed validation; never reached the pipeline
    Skipped { url: String, reason: String },
    Succeeded(JobReport),
    Failed {
        url: String,
        error: String,
        needs_credentials: bool,
        hint: Option<String>,
    },
    /// A list file or playlist that could not be read; none of its items ran
    SourceFailed {
        source: String,
        error: String,
        needs_credentials: bool,
    },
}

/// `total_attempted` covers only URLs that ran the pipeline; skips and
/// unreadable sources are tallied apart
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub total_attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub source_failures: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.total_attempted - self.succeeded
    }

    pub fn is_clean(&self) -> bool {
        self.succeeded == self.total_attempted && self.skipped == 0 && self.source_failures == 0
    }

    pub fn record_source_failure(&mut self, source: &str, error: String, needs_credentials: bool) {
        self.source_failures += 1;
        self.outcomes.push(ItemOutcome::SourceFailed {
            source: source.to_string(),
            error,
            needs_credentials,
        });
    }

    /// Fold a later run into this one, keeping input order
    pub fn merge(&mut self, other: BatchResult) {
        self.total_attempted += other.total_attempted;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.source_failures += other.source_failures;
        self.outcomes.extend(other.outcomes);
    }
}

/// Trimmed non-empty lines, `#` comments dropped
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Runs items one at a time. Output directory and quality can only change
/// between runs (`&mut self`), so a running job never sees them move.
pub struct BatchRunner {
    pipeline: DownloadPipeline,
    output_dir: PathBuf,
    quality: QualityChoice,
}

impl BatchRunner {
    pub fn new(pipeline: DownloadPipeline, output_dir: PathBuf, quality: QualityChoice) -> Self {
        Self {
            pipeline,
            output_dir,
            quality,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }

    /// Playlist links in the list are expanded in place, their entries run in order
    pub async fn run(&mut self, urls: &[String]) -> BatchResult {
        let mut result = BatchResult::default();
        let total = urls.len();

        for (index, url) in urls.iter().enumerate() {
            let url = url.trim();
            let label = format!("{}/{}", index + 1, total);
            if let Ok(UrlShape::Playlist) = validate_url(url) {
                self.expand_into(url, &label, &mut result).await;
            } else {
                self.run_item(url, &label, &mut result).await;
            }
        }

        tracing::info!(
            "[Batch] Done: {}/{} succeeded, {} skipped",
            result.succeeded,
            result.total_attempted,
            result.skipped
        );
        result
    }

    async fn expand_into(&self, url: &str, label: &str, result: &mut BatchResult) {
        let entries = match self.pipeline.client().expand_playlist(url).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("[Batch] {} playlist {} failed: {}", label, url, e);
                result.record_source_failure(url, e.to_string(), e.needs_credentials());
                return;
            }
        };

        let count = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            let entry_label = format!("{} [{}/{}]", label, index + 1, count);
            self.run_item(&entry.url, &entry_label, result).await;
        }
    }

    async fn run_item(&self, url: &str, label: &str, result: &mut BatchResult) {
        let url = url.trim();
        let rejection = match validate_url(url) {
            Err(e) => Some(e.to_string()),
            Ok(UrlShape::Playlist) => Some("playlist inside a playlist".to_string()),
            Ok(_) => None,
        };
        if let Some(reason) = rejection {
            tracing::warn!("[Batch] {} skipped {}: {}", label, url, reason);
            result.skipped += 1;
            result.outcomes.push(ItemOutcome::Skipped {
                url: url.to_string(),
                reason,
            });
            return;
        }

        tracing::info!("[Batch] {} {}", label, url);
        result.total_attempted += 1;
        match self.pipeline.run(url, &self.output_dir, &self.quality).await {
            Ok(report) => {
                result.succeeded += 1;
                result.outcomes.push(ItemOutcome::Succeeded(report));
            }
            Err(e) => {
                tracing::warn!("[Batch] {} failed: {}", label, e);
                result.outcomes.push(ItemOutcome::Failed {
                    url: url.to_string(),
                    error: e.to_string(),
                    needs_credentials: e.needs_credentials(),
                    hint: e.hint().map(str::to_string),
                });
            }
        }
    }

    /// One URL per line
    pub async fn run_file(&mut self, path: &Path) -> Result<BatchResult, DownloadError> {
        let text = tokio::fs::read_to_string(path).await?;
        let urls = parse_url_list(&text);
        tracing::info!("[Batch] {} URLs from {}", urls.len(), path.display());
        Ok(self.run(&urls).await)
    }

    pub async fn run_playlist(&mut self, url: &str) -> Result<BatchResult, ExtractionError> {
        let entries = self.pipeline.client().expand_playlist(url).await?;
        let urls: Vec<String> = entries.into_iter().map(|e| e.url).collect();
        Ok(self.run(&urls).await)
    }
}
