pub mod config;
pub mod downloader;
pub mod logging;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use config::Settings;
use downloader::batch::{BatchResult, BatchRunner};
use downloader::credentials::{BrowserCookies, CookieFile};
use downloader::extractor::{ExtractionClient, ExtractorConfig, YtDlpCli};
use downloader::installer::{ensure_transcoder, FfmpegInstaller, InstallStep};
use downloader::pipeline::{DownloadPipeline, PipelineOptions};
use downloader::progress::ProgressEvent;
use downloader::tools::{SearchPaths, TranscoderLocator};
use downloader::utils::program_dir;
use downloader::validation::{is_playlist_url, validate_url};

/// Wire settings into a ready runner. A missing transcoder is logged, not fatal:
/// each job that needs one reports it on its own.
pub async fn build_runner(settings: &Settings, progress: Option<UnboundedSender<ProgressEvent>>) -> BatchRunner {
    let locator = Arc::new(TranscoderLocator::new(SearchPaths::for_current_platform(
        settings.ffmpeg_path.clone(),
    )));
    if let Some(path) = &settings.ffmpeg_path {
        if let Err(e) = locator.set_user_path(path).await {
            tracing::warn!("[Locator] Ignoring configured ffmpeg_path: {}", e);
        }
    }

    let installer = settings
        .auto_install
        .then(|| FfmpegInstaller::new(program_dir(), settings.install_timeout()).with_proxy(settings.proxy.clone()));
    let on_step = |step: InstallStep| tracing::info!("[Installer] {}", step);
    match ensure_transcoder(&locator, installer.as_ref(), &on_step).await {
        Ok(bin) => tracing::info!("[Locator] Using {} ({})", bin.path.display(), bin.origin.as_str()),
        Err(e) => tracing::warn!("[Locator] {}", e),
    }

    let config = ExtractorConfig::default()
        .with_proxy(settings.proxy.clone())
        .with_socket_timeout(settings.socket_timeout_secs)
        .with_metadata_timeout(settings.metadata_timeout_secs);
    let mut client = ExtractionClient::new(Arc::new(YtDlpCli::new(settings.ytdlp_path.clone())), config);
    if let Some(file) = &settings.cookies_file {
        client = client.with_credentials(Box::new(CookieFile::new(file.clone())));
    } else if let Some(browser) = &settings.cookies_browser {
        client = client.with_credentials(Box::new(BrowserCookies::new(browser)));
    }

    let options = PipelineOptions {
        embed_metadata: settings.embed_metadata,
        format_id: settings.format_id.clone(),
        estimator: settings.estimator,
        thumbnail_timeout: settings.thumbnail_timeout(),
        proxy: settings.proxy.clone(),
    };
    let mut pipeline = DownloadPipeline::new(Arc::new(client), locator, options);
    if let Some(sink) = progress {
        pipeline = pipeline.with_progress(sink);
    }

    BatchRunner::new(pipeline, settings.output_dir.clone(), settings.quality)
}

/// Each input is a URL list file, a playlist URL or a single video URL.
/// A list file or playlist that cannot be read counts as a source failure,
/// not as an attempted download.
pub async fn run(runner: &mut BatchRunner, inputs: &[String]) -> BatchResult {
    let mut total = BatchResult::default();

    for input in inputs {
        let input = input.trim();
        let path = Path::new(input);

        if path.is_file() {
            match runner.run_file(path).await {
                Ok(result) => total.merge(result),
                Err(e) => {
                    tracing::warn!("[Batch] {}", e);
                    total.record_source_failure(input, e.to_string(), false);
                }
            }
        } else if validate_url(input).is_ok() && is_playlist_url(input) {
            match runner.run_playlist(input).await {
                Ok(result) => total.merge(result),
                Err(e) => {
                    tracing::warn!("[Batch] Playlist {} failed: {}", input, e);
                    total.record_source_failure(input, e.to_string(), e.needs_credentials());
                }
            }
        } else {
            total.merge(runner.run(&[input.to_string()]).await);
        }
    }

    total
}
