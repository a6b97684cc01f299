// Single-item pipeline: validate -> metadata -> fetch -> optional mux

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};

use super::errors::DownloadError;
use super::extractor::{ExtractionClient, FetchRequest, FetchSignal};
use super::format_selector::{FormatSelector, QualityChoice};
use super::models::{format_duration, DownloadJob, JobPhase, JobReport};
use super::muxer::{MetadataMuxer, TrackTags};
use super::progress::{EstimatorSettings, ProgressEvent, ProgressTracker};
use super::sanitize::{escape_template, sanitize};
use super::tools::TranscoderLocator;
use super::validation::validate_url;

/// Used when a title sanitizes down to nothing
const UNTITLED_STEM: &str = "download";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub embed_metadata: bool,
    /// Pin a specific audio format id instead of `bestaudio`
    pub format_id: Option<String>,
    pub estimator: EstimatorSettings,
    pub thumbnail_timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            embed_metadata: true,
            format_id: None,
            estimator: EstimatorSettings::default(),
            thumbnail_timeout: Duration::from_secs(10),
            proxy: None,
        }
    }
}

pub struct DownloadPipeline {
    client: Arc<ExtractionClient>,
    locator: Arc<TranscoderLocator>,
    options: PipelineOptions,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl DownloadPipeline {
    pub fn new(client: Arc<ExtractionClient>, locator: Arc<TranscoderLocator>, options: PipelineOptions) -> Self {
        Self {
            client,
            locator,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }

    pub async fn run(&self, url: &str, output_dir: &Path, quality: &QualityChoice) -> Result<JobReport, DownloadError> {
        let url = url.trim();
        validate_url(url)?;

        let info = self.client.get_metadata(url).await?;
        tracing::info!(
            "[Pipeline] {} ({}) by {}",
            info.title,
            format_duration(info.duration_seconds),
            info.uploader
        );

        let mut stem = sanitize(&info.title);
        if stem.is_empty() {
            stem = UNTITLED_STEM.to_string();
        }

        let selection = FormatSelector::resolve_with_format(quality, self.options.format_id.as_deref());

        let transcoder = if selection.requires_transcoder() {
            Some(self.locator.resolve().await?)
        } else {
            self.locator.resolve().await.ok()
        };

        tokio::fs::create_dir_all(output_dir).await?;

        let mut job = DownloadJob {
            source_url: url.to_string(),
            output_path: output_dir.join(format!("{}.{}", stem, selection.output_ext())),
            sanitized_title: stem,
            duration_seconds: info.duration_seconds,
            selection,
            phase: JobPhase::Idle,
        };

        let request = FetchRequest {
            url: job.source_url.clone(),
            selection: job.selection.clone(),
            output_template: output_dir
                .join(format!("{}.%(ext)s", escape_template(&job.sanitized_title)))
                .to_string_lossy()
                .to_string(),
            transcoder: transcoder.as_ref().map(|t| t.path.clone()),
        };

        let events = self
            .progress
            .clone()
            .unwrap_or_else(|| mpsc::unbounded_channel().0);
        let streams = if job.selection.selector.contains('+') { 2 } else { 1 };
        let mut tracker = ProgressTracker::new(
            job.duration_seconds,
            job.selection.requires_transcoder(),
            self.options.estimator,
            events,
        )
        .with_expected_streams(streams);

        tracker.start_download();
        job.phase = tracker.phase();

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<FetchSignal>();
        let fetch = self.client.fetch(&request, signal_tx);
        let consume = async {
            let mut destination: Option<PathBuf> = None;
            while let Some(signal) = signal_rx.recv().await {
                if let FetchSignal::Destination(path) = &signal {
                    destination = Some(path.clone());
                }
                tracker.handle(&signal);
            }
            destination
        };
        let (fetched, destination) = tokio::join!(fetch, consume);

        if let Err(e) = fetched {
            tracker.fail(&e.to_string());
            tracing::warn!("[Pipeline] Fetch failed for {}: {}", url, e);
            return Err(e.into());
        }
        tracker.finish();
        job.phase = tracker.phase();

        let output_path = if job.output_path.exists() {
            job.output_path.clone()
        } else {
            match destination.filter(|p| p.exists()) {
                Some(path) => path,
                None => return Err(DownloadError::OutputMissing(job.output_path.clone())),
            }
        };

        let mut metadata_embedded = false;
        let mut mux_error = None;
        if self.options.embed_metadata && job.selection.wants_metadata() {
            if let Some(transcoder) = &transcoder {
                let muxer = MetadataMuxer::new(transcoder.path.clone())
                    .with_thumbnail_timeout(self.options.thumbnail_timeout)
                    .with_proxy(self.options.proxy.clone());
                let tags = TrackTags {
                    title: info.title.clone(),
                    artist: Some(info.uploader.clone()),
                    thumbnail_url: info.thumbnail_url.clone(),
                };
                match muxer.embed(&output_path, &tags).await {
                    Ok(()) => metadata_embedded = true,
                    Err(e) => {
                        tracing::warn!("[Mux] Skipped metadata for {}: {}", output_path.display(), e);
                        mux_error = Some(e.to_string());
                    }
                }
            }
        }

        tracing::info!("[Pipeline] Saved {}", output_path.display());
        Ok(JobReport {
            url: job.source_url,
            title: info.title,
            output_path,
            metadata_embedded,
            mux_error,
            auth_degraded: self.client.auth_degraded(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::{ExtractionError, ValidationError};
    use crate::downloader::extractor::tests::FakeExtractor;
    use crate::downloader::extractor::ExtractorConfig;
    use crate::downloader::tools::SearchPaths;
    use std::sync::atomic::Ordering;

    /// Locator whose only candidate is a user-supplied path
    fn locator_with(path: Option<PathBuf>) -> Arc<TranscoderLocator> {
        Arc::new(TranscoderLocator::new(SearchPaths {
            program_dir: PathBuf::from("/nonexistent/program-dir"),
            probe_program: "ffmpeg-probe-that-does-not-exist".to_string(),
            common_dirs: Vec::new(),
            user_path: path,
        }))
    }

    fn pipeline(fake: Arc<FakeExtractor>, transcoder: Option<PathBuf>) -> DownloadPipeline {
        let client = Arc::new(ExtractionClient::new(fake, ExtractorConfig::default()));
        let options = PipelineOptions {
            embed_metadata: false,
            ..Default::default()
        };
        DownloadPipeline::new(client, locator_with(transcoder), options)
    }

    fn fake_transcoder(dir: &Path) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_service() {
        let fake = Arc::new(FakeExtractor::new("Song", 10));
        let err = pipeline(fake.clone(), None)
            .run("https://vimeo.com/123", Path::new("/tmp"), &QualityChoice::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Validation(ValidationError::UnsupportedUrl(_))));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_audio_without_transcoder_is_hard_error() {
        let fake = Arc::new(FakeExtractor::new("Song", 10));
        let out = tempfile::tempdir().unwrap();
        let err = pipeline(fake, None)
            .run("https://youtu.be/abc", out.path(), &QualityChoice::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::TranscoderRequired(_)));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_successful_run_uses_sanitized_title() {
        let tools = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExtractor::new("AC/DC: Back In Black?", 255));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = pipeline(fake, Some(fake_transcoder(tools.path())))
            .with_progress(tx)
            .run("https://www.youtube.com/watch?v=abc", out.path(), &QualityChoice::default())
            .await
            .unwrap();

        assert_eq!(report.output_path, out.path().join("ACDC Back In Black.mp3"));
        assert!(report.output_path.exists());
        assert!(!report.metadata_embedded);
        assert_eq!(report.auth_degraded, None);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.phase, JobPhase::Done);
        assert_eq!(last.percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_failed_phase() {
        let tools = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut fake = FakeExtractor::new("Song", 10);
        fake.fail_fetch = Some(ExtractionError::Failed("HTTP Error 500".to_string()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = pipeline(Arc::new(fake), Some(fake_transcoder(tools.path())))
            .with_progress(tx)
            .run("https://youtu.be/abc", out.path(), &QualityChoice::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Extraction(ExtractionError::Failed(_))));

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            phases.push(event.phase);
        }
        assert_eq!(phases.first(), Some(&JobPhase::Downloading));
        assert_eq!(phases.last(), Some(&JobPhase::Failed));
        assert!(!phases.contains(&JobPhase::Done));
    }

    #[tokio::test]
    async fn test_mux_failure_does_not_fail_job() {
        let out = tempfile::tempdir().unwrap();
        let mut fake = FakeExtractor::new("Song", 10);
        fake.details.info.thumbnail_url = Some("http://127.0.0.1:9/cover.jpg".to_string());
        let client = Arc::new(ExtractionClient::new(Arc::new(fake), ExtractorConfig::default()));
        let tools = tempfile::tempdir().unwrap();
        let options = PipelineOptions {
            thumbnail_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let pipeline = DownloadPipeline::new(client, locator_with(Some(fake_transcoder(tools.path()))), options);

        let report = pipeline
            .run("https://youtu.be/abc", out.path(), &QualityChoice::default())
            .await
            .unwrap();

        assert!(!report.metadata_embedded);
        assert!(report.mux_error.unwrap().contains("Thumbnail"));
        assert_eq!(std::fs::read(&report.output_path).unwrap(), b"fake audio bytes");
    }

    #[tokio::test]
    async fn test_empty_title_falls_back() {
        let tools = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExtractor::new("???", 10));

        let report = pipeline(fake, Some(fake_transcoder(tools.path())))
            .run("https://youtu.be/abc", out.path(), &QualityChoice::default())
            .await
            .unwrap();
        assert_eq!(report.output_path, out.path().join("download.mp3"));
    }
}
