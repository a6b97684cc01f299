use std::process::ExitCode;

use tokio::sync::mpsc;

use youtube_audio_downloader_lib::config::Settings;
use youtube_audio_downloader_lib::downloader::batch::ItemOutcome;
use youtube_audio_downloader_lib::downloader::models::JobPhase;
use youtube_audio_downloader_lib::downloader::progress::ProgressEvent;
use youtube_audio_downloader_lib::{build_runner, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing();

    let inputs: Vec<String> = std::env::args().skip(1).collect();
    if inputs.is_empty() {
        eprintln!("usage: youtube-audio-downloader <url | playlist url | file with urls>...");
        return ExitCode::from(2);
    }

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(notice) = &event.notice {
                eprintln!("\n{}", notice);
            }
            match event.phase {
                JobPhase::Done | JobPhase::Failed => eprintln!("{}", progress_line(&event)),
                JobPhase::Idle => {}
                _ => eprint!("{}", progress_line(&event)),
            }
        }
    });

    let mut runner = build_runner(&settings, Some(tx)).await;
    let result = run(&mut runner, &inputs).await;
    drop(runner);
    let _ = printer.await;

    for outcome in &result.outcomes {
        match outcome {
            ItemOutcome::Succeeded(report) => {
                println!("ok      {}", report.output_path.display());
                if let Some(reason) = &report.auth_degraded {
                    println!("        ({})", reason);
                }
            }
            ItemOutcome::Skipped { url, reason } => println!("skipped {} ({})", url, reason),
            ItemOutcome::Failed {
                url,
                error,
                needs_credentials,
                hint,
            } => {
                println!("failed  {}: {}", url, error);
                if let Some(hint) = hint {
                    println!("        {}", hint);
                }
                if *needs_credentials {
                    println!("        set cookies_browser or cookies_file in the settings and retry");
                }
            }
            ItemOutcome::SourceFailed {
                source,
                error,
                needs_credentials,
            } => {
                println!("unread  {}: {}", source, error);
                if *needs_credentials {
                    println!("        set cookies_browser or cookies_file in the settings and retry");
                }
            }
        }
    }
    println!(
        "{}/{} succeeded, {} skipped, {} sources unreadable",
        result.succeeded, result.total_attempted, result.skipped, result.source_failures
    );

    if result.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Carriage-return line for one progress event, padded to overwrite the last one
fn progress_line(event: &ProgressEvent) -> String {
    match (event.phase, event.percent) {
        (JobPhase::Downloading, Some(p)) => {
            let rate = event.rate_mbps.map(|r| format!(" {:.2} MB/s", r)).unwrap_or_default();
            format!("\rDownloading {:5.1}%{}   ", p, rate)
        }
        (JobPhase::Downloading, None) => "\rDownloading...   ".to_string(),
        (JobPhase::Converting, Some(p)) => format!("\rConverting ~{:4.1}%          ", p),
        (JobPhase::Converting, None) => "\rConverting...          ".to_string(),
        (JobPhase::Done, _) => "\rDone                          ".to_string(),
        (JobPhase::Failed, _) => "\rFailed                        ".to_string(),
        (JobPhase::Idle, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(phase: JobPhase, percent: Option<f64>, rate_mbps: Option<f64>) -> ProgressEvent {
        ProgressEvent {
            phase,
            percent,
            rate_mbps,
            eta_seconds: None,
            notice: None,
        }
    }

    #[tokio::test]
    async fn test_progress_events_cross_the_printer_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        tx.send(event(JobPhase::Downloading, Some(42.0), Some(1.5))).unwrap();
        tx.send(event(JobPhase::Converting, None, None)).unwrap();
        drop(tx);

        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            lines.push(progress_line(&event));
        }

        assert!(lines[0].contains(" 42.0%"));
        assert!(lines[0].contains("1.50 MB/s"));
        assert!(lines[1].starts_with("\rConverting..."));
    }

    #[test]
    fn test_idle_prints_nothing() {
        assert!(progress_line(&event(JobPhase::Idle, None, None)).is_empty());
        assert!(progress_line(&event(JobPhase::Done, Some(100.0), None)).contains("Done"));
    }
}
