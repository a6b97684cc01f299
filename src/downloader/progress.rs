// Progress tracking for one job
//
// Idle -> Downloading -> (Converting) -> Done, Failed from anywhere.
// The transcoder reports no usable progress, so the Converting percent is a
// time-based estimate. Only the authoritative finished signal moves the phase
// to Done and emits 100.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::extractor::FetchSignal;
use super::models::JobPhase;

pub const STILL_WORKING_NOTICE: &str = "Conversion is taking longer than expected, still working...";

/// One progress sample for the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: JobPhase,
    /// `None` is the indeterminate indicator
    pub percent: Option<f64>,
    pub rate_mbps: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub notice: Option<String>,
}

impl ProgressEvent {
    fn bare(phase: JobPhase, percent: Option<f64>) -> Self {
        Self {
            phase,
            percent,
            rate_mbps: None,
            eta_seconds: None,
            notice: None,
        }
    }
}

/// Conversion estimator calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Assumed transcode time as a fraction of media duration
    pub throughput_factor: f64,
    pub tick_ms: u64,
    pub cap_percent: f64,
    pub ceiling_floor_secs: u64,
    pub ceiling_factor: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            throughput_factor: 0.1,
            tick_ms: 500,
            cap_percent: 95.0,
            ceiling_floor_secs: 10,
            ceiling_factor: 0.5,
        }
    }
}

impl EstimatorSettings {
    /// Estimated percent after `elapsed`, or `None` when the duration is unknown
    pub fn estimate(&self, elapsed: Duration, duration_seconds: u64) -> Option<f64> {
        if duration_seconds == 0 || self.throughput_factor <= 0.0 {
            return None;
        }
        let expected = duration_seconds as f64 * self.throughput_factor;
        let percent = elapsed.as_secs_f64() / expected * 100.0;
        Some(percent.max(0.0).min(self.cap_percent))
    }

    /// Polling stops after this; the job itself keeps waiting
    pub fn ceiling(&self, duration_seconds: u64) -> Duration {
        let scaled = Duration::from_secs_f64(duration_seconds as f64 * self.ceiling_factor.max(0.0));
        scaled.max(Duration::from_secs(self.ceiling_floor_secs))
    }
}

/// Download percent; `None` when the total is unknown
pub fn download_percent(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)),
        _ => None,
    }
}

/// Bytes per second to MB/s, unsmoothed
pub fn to_mbps(speed_bytes_per_sec: Option<f64>) -> Option<f64> {
    speed_bytes_per_sec
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s / 1024.0 / 1024.0)
}

/// Shared by the tracker and the estimator task; holding the lock while
/// emitting keeps estimates from landing after the final 100
struct ConvertGate {
    converting: Mutex<bool>,
}

impl ConvertGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.converting.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct ProgressTracker {
    phase: JobPhase,
    duration_seconds: u64,
    transcode_required: bool,
    settings: EstimatorSettings,
    events: UnboundedSender<ProgressEvent>,
    gate: Arc<ConvertGate>,
    estimator: Option<JoinHandle<()>>,
    /// Separate streams still downloading (video + audio merges fetch two)
    streams_remaining: u32,
}

impl ProgressTracker {
    pub fn new(
        duration_seconds: u64,
        transcode_required: bool,
        settings: EstimatorSettings,
        events: UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            phase: JobPhase::Idle,
            duration_seconds,
            transcode_required,
            settings,
            events,
            gate: Arc::new(ConvertGate {
                converting: Mutex::new(false),
            }),
            estimator: None,
            streams_remaining: 1,
        }
    }

    pub fn with_expected_streams(mut self, streams: u32) -> Self {
        self.streams_remaining = streams.max(1);
        self
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    pub fn start_download(&mut self) {
        if self.phase == JobPhase::Idle {
            self.phase = JobPhase::Downloading;
            self.emit(ProgressEvent::bare(JobPhase::Downloading, Some(0.0)));
        }
    }

    /// Raw download callback
    pub fn on_download(
        &mut self,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        speed_bytes_per_sec: Option<f64>,
        eta_seconds: Option<u64>,
    ) {
        if self.phase == JobPhase::Idle {
            self.start_download();
        }
        if self.phase != JobPhase::Downloading {
            return;
        }
        self.emit(ProgressEvent {
            phase: JobPhase::Downloading,
            percent: download_percent(downloaded_bytes, total_bytes),
            rate_mbps: to_mbps(speed_bytes_per_sec),
            eta_seconds,
            notice: None,
        });
    }

    /// Bytes are on disk; either start converting or finish
    pub fn download_finished(&mut self) {
        if self.phase != JobPhase::Downloading && self.phase != JobPhase::Idle {
            return;
        }
        if !self.transcode_required {
            self.complete();
            return;
        }

        self.phase = JobPhase::Converting;
        *self.gate.lock() = true;
        let first = self.settings.estimate(Duration::ZERO, self.duration_seconds);
        self.emit(ProgressEvent::bare(JobPhase::Converting, first));

        self.estimator = Some(tokio::spawn(run_estimator(
            Arc::clone(&self.gate),
            self.events.clone(),
            self.duration_seconds,
            self.settings,
        )));
    }

    /// Authoritative completion: transcoder post-processor finished, or the fetch exited cleanly
    pub fn finish(&mut self) {
        match self.phase {
            JobPhase::Done | JobPhase::Failed => {}
            _ => self.complete(),
        }
    }

    pub fn fail(&mut self, reason: &str) {
        if self.phase.is_terminal() {
            return;
        }
        let mut converting = self.gate.lock();
        *converting = false;
        self.phase = JobPhase::Failed;
        let mut event = ProgressEvent::bare(JobPhase::Failed, None);
        event.notice = Some(reason.to_string());
        self.emit(event);
        drop(converting);
        self.stop_estimator();
    }

    /// Feed one signal from the extraction service
    pub fn handle(&mut self, signal: &FetchSignal) {
        match signal {
            FetchSignal::Download {
                downloaded_bytes,
                total_bytes,
                speed_bytes_per_sec,
                eta_seconds,
            } => self.on_download(*downloaded_bytes, *total_bytes, *speed_bytes_per_sec, *eta_seconds),
            FetchSignal::DownloadFinished => {
                self.streams_remaining = self.streams_remaining.saturating_sub(1);
                if self.phase == JobPhase::Downloading && self.streams_remaining == 0 {
                    self.download_finished();
                }
            }
            FetchSignal::PostProcessStarted { .. } => {
                if self.phase == JobPhase::Downloading {
                    self.download_finished();
                }
            }
            FetchSignal::PostProcessFinished { processor } => {
                if self.phase == JobPhase::Converting && is_transcode_step(processor) {
                    self.finish();
                }
            }
            FetchSignal::Destination(_) => {}
        }
    }

    fn complete(&mut self) {
        let mut converting = self.gate.lock();
        *converting = false;
        self.phase = JobPhase::Done;
        self.emit(ProgressEvent::bare(JobPhase::Done, Some(100.0)));
        drop(converting);
        self.stop_estimator();
    }

    fn stop_estimator(&mut self) {
        if let Some(handle) = self.estimator.take() {
            handle.abort();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop_estimator();
    }
}

/// Post-processors that actually run the transcoder
pub fn is_transcode_step(processor: &str) -> bool {
    ["ExtractAudio", "Merger", "VideoRemuxer", "VideoConvertor"]
        .iter()
        .any(|p| processor.contains(p))
}

async fn run_estimator(
    gate: Arc<ConvertGate>,
    events: UnboundedSender<ProgressEvent>,
    duration_seconds: u64,
    settings: EstimatorSettings,
) {
    let started = Instant::now();
    let ceiling = settings.ceiling(duration_seconds);
    let mut ticker = tokio::time::interval(Duration::from_millis(settings.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately and the tracker already emitted for t=0
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let elapsed = started.elapsed();

        let converting = gate.lock();
        if !*converting {
            break;
        }

        let percent = settings.estimate(elapsed, duration_seconds);
        if elapsed >= ceiling {
            let mut event = ProgressEvent::bare(JobPhase::Converting, percent);
            event.notice = Some(STILL_WORKING_NOTICE.to_string());
            let _ = events.send(event);
            tracing::info!(
                "[Progress] Conversion still running after {}s, waiting for the transcoder",
                elapsed.as_secs()
            );
            break;
        }
        let _ = events.send(ProgressEvent::bare(JobPhase::Converting, percent));
    }
}
