// Extraction service adapter
//
// `MediaExtractor` is the seam to the external service (yt-dlp CLI in
// production, fakes in tests). `ExtractionClient` sits on top: it attaches
// credentials once, shapes format listings and rejects non-playlists early.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::OnceCell;

use super::credentials::{CookieSource, CredentialProvider};
use super::errors::ExtractionError;
use super::format_selector::FormatSelection;
use super::models::{EntryRef, FormatDescriptor, MediaInfo, StreamFormat, FALLBACK_TITLE};
use super::utils::run_output_with_timeout;
use super::validation::{is_playlist_url, validate_url};

const FETCH_PREFIX: &str = "[fetch]";
const CONVERT_PREFIX: &str = "[convert]";

/// Per-call service options; cookies are filled in by `ExtractionClient`
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub proxy: Option<String>,
    pub cookies: Option<CookieSource>,
    /// Passed as `--socket-timeout`
    pub socket_timeout_secs: u32,
    /// Hard limit for metadata and playlist calls
    pub metadata_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies: None,
            socket_timeout_secs: 30,
            metadata_timeout_secs: 60,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies(mut self, cookies: Option<CookieSource>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_socket_timeout(mut self, seconds: u32) -> Self {
        self.socket_timeout_secs = seconds;
        self
    }

    pub fn with_metadata_timeout(mut self, seconds: u64) -> Self {
        self.metadata_timeout_secs = seconds;
        self
    }

    /// Network and auth arguments shared by every call
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
        ];
        if let Some(cookies) = &self.cookies {
            args.extend(cookies.service_args());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

/// Metadata plus the raw format list, from one service call
#[derive(Debug, Clone)]
pub struct MediaDetails {
    pub info: MediaInfo,
    pub formats: Vec<StreamFormat>,
}

/// Everything the service needs to fetch one item
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub selection: FormatSelection,
    /// Service output template, e.g. `/music/Title.%(ext)s`
    pub output_template: String,
    /// Resolved transcoder, threaded explicitly instead of via PATH
    pub transcoder: Option<PathBuf>,
}

/// Raw signals from a running fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchSignal {
    Download {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        speed_bytes_per_sec: Option<f64>,
        eta_seconds: Option<u64>,
    },
    DownloadFinished,
    PostProcessStarted { processor: String },
    PostProcessFinished { processor: String },
    /// File the service wrote or is about to write
    Destination(PathBuf),
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn metadata(&self, url: &str, config: &ExtractorConfig) -> Result<MediaDetails, ExtractionError>;

    async fn playlist(&self, url: &str, config: &ExtractorConfig) -> Result<Vec<EntryRef>, ExtractionError>;

    /// Runs to completion, streaming signals as they happen
    async fn fetch(
        &self,
        request: &FetchRequest,
        config: &ExtractorConfig,
        signals: UnboundedSender<FetchSignal>,
    ) -> Result<(), ExtractionError>;
}

/// yt-dlp command line
pub struct YtDlpCli {
    ytdlp_path: String,
}

impl YtDlpCli {
    pub fn new(path_override: Option<PathBuf>) -> Self {
        let ytdlp_path = path_override
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(Self::find_ytdlp);
        Self { ytdlp_path }
    }

    fn find_ytdlp() -> String {
        if let Ok(path) = which::which("yt-dlp") {
            return path.to_string_lossy().to_string();
        }

        [
            "/opt/homebrew/bin/yt-dlp",
            "/usr/local/bin/yt-dlp",
            "/usr/bin/yt-dlp",
        ]
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
        .unwrap_or_else(|| "yt-dlp".to_string())
    }

    async fn run_json(
        &self,
        mut args: Vec<String>,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<serde_json::Value, ExtractionError> {
        args.extend(config.common_args());
        args.push(url.to_string());
        tracing::debug!("[Fetch] {} {}", self.ytdlp_path, args.join(" "));

        let out = run_output_with_timeout(&self.ytdlp_path, args, config.metadata_timeout_secs)
            .await
            .map_err(|e| map_run_error(e, config.metadata_timeout_secs))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let err = ExtractionError::from_stderr(&stderr);
            tracing::warn!("[Fetch] {} failed for {}: {}", self.name(), url, err);
            return Err(err);
        }

        serde_json::from_slice(&out.stdout).map_err(|e| ExtractionError::Parse(format!("Invalid JSON: {}", e)))
    }

    fn fetch_args(request: &FetchRequest, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-colors".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{} %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s \
                 %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s",
                FETCH_PREFIX
            ),
            "--progress-template".to_string(),
            format!(
                "postprocess:{} %(progress.status)s %(progress.postprocessor)s",
                CONVERT_PREFIX
            ),
            "-o".to_string(),
            request.output_template.clone(),
        ];
        args.extend(request.selection.service_args());
        if let Some(ffmpeg) = &request.transcoder {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }
        args.extend(config.common_args());
        args.push(request.url.clone());
        args
    }
}

fn map_run_error(message: String, timeout_secs: u64) -> ExtractionError {
    if message.starts_with("Timed out") {
        ExtractionError::Timeout(timeout_secs)
    } else if message.starts_with("Failed to start") {
        ExtractionError::ServiceNotFound(message)
    } else {
        ExtractionError::Failed(message)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpCli {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn metadata(&self, url: &str, config: &ExtractorConfig) -> Result<MediaDetails, ExtractionError> {
        let args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
        ];
        let json = self.run_json(args, url, config).await?;
        Ok(parse_media_json(&json))
    }

    async fn playlist(&self, url: &str, config: &ExtractorConfig) -> Result<Vec<EntryRef>, ExtractionError> {
        let args = vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
        ];
        let json = self.run_json(args, url, config).await?;
        Ok(parse_playlist_json(&json))
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        config: &ExtractorConfig,
        signals: UnboundedSender<FetchSignal>,
    ) -> Result<(), ExtractionError> {
        let args = Self::fetch_args(request, config);
        tracing::debug!("[Fetch] {} {}", self.ytdlp_path, args.join(" "));

        let mut child = TokioCommand::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionError::ServiceNotFound(format!("Failed to start {}: {}", self.ytdlp_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractionError::Failed("Failed to capture stdout".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ExtractionError::Failed("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        // raw bytes: a line in a legacy code page must not stop the drain,
        // or the child blocks on a full pipe
        {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(signal) = parse_signal_line(&String::from_utf8_lossy(&buf)) {
                            let _ = signals.send(signal);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("[Fetch] Stopped reading {} output: {}", self.name(), e);
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExtractionError::Failed(format!("Failed to wait for {}: {}", self.ytdlp_path, e)))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            let err = ExtractionError::from_stderr(&stderr);
            tracing::warn!("[Fetch] {} exited with {}: {}", self.name(), status, err);
            Err(err)
        }
    }
}

/// Build `MediaDetails` from `--dump-json` output
pub fn parse_media_json(json: &serde_json::Value) -> MediaDetails {
    let title = json["title"]
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(FALLBACK_TITLE)
        .to_string();

    let info = MediaInfo {
        title,
        duration_seconds: json["duration"].as_f64().filter(|d| *d > 0.0).map_or(0, |d| d.round() as u64),
        uploader: json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .unwrap_or("Unknown")
            .to_string(),
        thumbnail_url: json["thumbnail"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    };

    let formats = json["formats"]
        .as_array()
        .map(|list| list.iter().map(parse_stream_format).collect())
        .unwrap_or_default();

    MediaDetails { info, formats }
}

fn parse_stream_format(f: &serde_json::Value) -> StreamFormat {
    StreamFormat {
        format_id: f["format_id"].as_str().unwrap_or_default().to_string(),
        ext: f["ext"].as_str().unwrap_or_default().to_string(),
        vcodec: f["vcodec"].as_str().map(str::to_string),
        acodec: f["acodec"].as_str().map(str::to_string),
        height: f["height"].as_u64().map(|h| h as u32),
        abr: f["abr"].as_f64(),
        tbr: f["tbr"].as_f64(),
        filesize: f["filesize"].as_u64(),
        filesize_approx: f["filesize_approx"].as_u64(),
    }
}

/// Entries from `--flat-playlist` output; entries without url or id are dropped
pub fn parse_playlist_json(json: &serde_json::Value) -> Vec<EntryRef> {
    let Some(entries) = json["entries"].as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let url = entry["url"]
                .as_str()
                .filter(|u| u.starts_with("http"))
                .map(str::to_string)
                .or_else(|| {
                    entry["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                })?;
            let title = entry["title"]
                .as_str()
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Video {}", index + 1));
            let duration_seconds = entry["duration"].as_f64().filter(|d| *d > 0.0).map_or(0, |d| d.round() as u64);
            Some(EntryRef {
                title,
                duration_seconds,
                url,
            })
        })
        .collect()
}

fn parse_opt_u64(field: &str) -> Option<u64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64)
}

fn parse_opt_f64(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse one stdout line of a fetch run
pub fn parse_signal_line(line: &str) -> Option<FetchSignal> {
    lazy_static::lazy_static! {
        static ref DEST_RE: Regex = Regex::new(r"^\[(?:download|ExtractAudio|VideoRemuxer|VideoConvertor)\] Destination: (.+)$").unwrap();
        static ref MERGE_RE: Regex = Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).unwrap();
        static ref ALREADY_RE: Regex = Regex::new(r"^\[download\] (.+) has already been downloaded").unwrap();
    }

    let line = line.trim_end();

    if let Some(rest) = line.strip_prefix(FETCH_PREFIX) {
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let status = *fields.first()?;
        return match status {
            "finished" => Some(FetchSignal::DownloadFinished),
            "downloading" => {
                let field = |i: usize| fields.get(i).copied().unwrap_or("NA");
                Some(FetchSignal::Download {
                    downloaded_bytes: parse_opt_u64(field(1)).unwrap_or(0),
                    total_bytes: parse_opt_u64(field(2)).or_else(|| parse_opt_u64(field(3))),
                    speed_bytes_per_sec: parse_opt_f64(field(4)),
                    eta_seconds: parse_opt_u64(field(5)),
                })
            }
            _ => None,
        };
    }

    if let Some(rest) = line.strip_prefix(CONVERT_PREFIX) {
        let mut fields = rest.split_whitespace();
        let status = fields.next()?;
        let processor = fields.next().unwrap_or_default().to_string();
        return match status {
            "started" => Some(FetchSignal::PostProcessStarted { processor }),
            "finished" => Some(FetchSignal::PostProcessFinished { processor }),
            _ => None,
        };
    }

    DEST_RE
        .captures(line)
        .or_else(|| MERGE_RE.captures(line))
        .or_else(|| ALREADY_RE.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| FetchSignal::Destination(PathBuf::from(m.as_str().trim())))
}

/// Outcome of the one-time credential lookup
#[derive(Debug, Clone)]
enum AuthState {
    Anonymous,
    Authenticated(CookieSource),
    Degraded(String),
}

/// Adapter the pipeline talks to
pub struct ExtractionClient {
    extractor: Arc<dyn MediaExtractor>,
    config: ExtractorConfig,
    credentials: Option<Box<dyn CredentialProvider>>,
    auth: OnceCell<AuthState>,
}

impl ExtractionClient {
    pub fn new(extractor: Arc<dyn MediaExtractor>, config: ExtractorConfig) -> Self {
        Self {
            extractor,
            config,
            credentials: None,
            auth: OnceCell::new(),
        }
    }

    pub fn with_credentials(mut self, provider: Box<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self.auth = OnceCell::new();
        self
    }

    /// Degradation message once credentials were attempted and failed
    pub fn auth_degraded(&self) -> Option<String> {
        match self.auth.get() {
            Some(AuthState::Degraded(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    async fn effective_config(&self) -> ExtractorConfig {
        let state = self
            .auth
            .get_or_init(|| async {
                let Some(provider) = &self.credentials else {
                    return AuthState::Anonymous;
                };
                match provider.cookies().await {
                    Ok(source) => {
                        tracing::info!("[Fetch] Using {}", provider.name());
                        AuthState::Authenticated(source)
                    }
                    Err(e) => {
                        let reason = format!("{} unavailable, continuing without login: {}", provider.name(), e);
                        tracing::warn!("[Fetch] {}", reason);
                        AuthState::Degraded(reason)
                    }
                }
            })
            .await;

        match state {
            AuthState::Authenticated(source) => self.config.clone().with_cookies(Some(source.clone())),
            AuthState::Anonymous | AuthState::Degraded(_) => self.config.clone(),
        }
    }

    pub async fn get_metadata(&self, url: &str) -> Result<MediaInfo, ExtractionError> {
        let config = self.effective_config().await;
        Ok(self.extractor.metadata(url, &config).await?.info)
    }

    /// Audio-only streams, highest bitrate first, unknown bitrates last
    pub async fn list_audio_formats(&self, url: &str) -> Result<Vec<FormatDescriptor>, ExtractionError> {
        let config = self.effective_config().await;
        let details = self.extractor.metadata(url, &config).await?;
        Ok(audio_formats(&details.formats))
    }

    pub async fn expand_playlist(&self, url: &str) -> Result<Vec<EntryRef>, ExtractionError> {
        let url = url.trim();
        validate_url(url).map_err(|e| ExtractionError::BadUrl(e.to_string()))?;
        if !is_playlist_url(url) {
            return Err(ExtractionError::NotAPlaylist(url.to_string()));
        }
        let config = self.effective_config().await;
        let entries = self.extractor.playlist(url, &config).await?;
        tracing::info!("[Fetch] Playlist {} has {} entries", url, entries.len());
        Ok(entries)
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        signals: UnboundedSender<FetchSignal>,
    ) -> Result<(), ExtractionError> {
        let config = self.effective_config().await;
        self.extractor.fetch(request, &config, signals).await
    }
}

/// Filter to audio-only and order by descending bitrate; unknown sorts as zero
pub fn audio_formats(formats: &[StreamFormat]) -> Vec<FormatDescriptor> {
    let mut list: Vec<FormatDescriptor> = formats
        .iter()
        .filter(|f| f.is_audio_only())
        .map(FormatDescriptor::from)
        .collect();

    list.sort_by(|a, b| {
        let (a, b) = (a.bitrate_kbps.unwrap_or(0.0), b.bitrate_kbps.unwrap_or(0.0));
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    list
}
