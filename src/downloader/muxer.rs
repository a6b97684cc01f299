// Tag and cover-art embedding for finished audio files

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempPath;

use super::errors::MuxError;
use super::utils::{download_to_file, http_client, run_output_with_timeout};

#[derive(Debug, Clone, Default)]
pub struct TrackTags {
    pub title: String,
    pub artist: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Rewrites an audio file with tags (and cover art when a thumbnail is known).
/// The original is only replaced once the new file is complete.
pub struct MetadataMuxer {
    transcoder: PathBuf,
    thumbnail_timeout: Duration,
    mux_timeout_secs: u64,
    proxy: Option<String>,
}

impl MetadataMuxer {
    pub fn new(transcoder: PathBuf) -> Self {
        Self {
            transcoder,
            thumbnail_timeout: Duration::from_secs(10),
            mux_timeout_secs: 120,
            proxy: None,
        }
    }

    pub fn with_thumbnail_timeout(mut self, timeout: Duration) -> Self {
        self.thumbnail_timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub async fn embed(&self, audio: &Path, tags: &TrackTags) -> Result<(), MuxError> {
        let dir = audio
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let ext = audio
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "mp3".to_string());

        let cover = match &tags.thumbnail_url {
            Some(url) => Some(self.fetch_cover(url, dir).await?),
            None => None,
        };

        // temp output beside the original so the final rename stays on one filesystem
        let output = tempfile::Builder::new()
            .prefix(".mux-")
            .suffix(&format!(".{}", ext))
            .tempfile_in(dir)?
            .into_temp_path();

        let args = mux_args(audio, cover.as_deref(), &output, tags, &ext);
        let program = self.transcoder.to_string_lossy().to_string();
        tracing::debug!("[Mux] {} {}", program, args.join(" "));

        let out = run_output_with_timeout(&program, args, self.mux_timeout_secs)
            .await
            .map_err(MuxError::Transcoder)?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
            return Err(MuxError::Transcoder(format!("exit {}: {}", out.status, last.trim())));
        }

        let written = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(MuxError::Transcoder("transcoder produced an empty file".to_string()));
        }

        output
            .persist(audio)
            .map_err(|e| MuxError::Replace(format!("{}: {}", audio.display(), e.error)))?;

        tracing::info!(
            "[Mux] Embedded {} into {}",
            if cover.is_some() { "tags and cover" } else { "tags" },
            audio.display()
        );
        Ok(())
    }

    async fn fetch_cover(&self, url: &str, dir: &Path) -> Result<TempPath, MuxError> {
        let cover = tempfile::Builder::new()
            .prefix(".cover-")
            .suffix(".jpg")
            .tempfile_in(dir)?
            .into_temp_path();

        let client = http_client(self.thumbnail_timeout, self.proxy.as_deref()).map_err(MuxError::Thumbnail)?;
        download_to_file(&client, url, &cover, self.thumbnail_timeout)
            .await
            .map_err(MuxError::Thumbnail)?;
        Ok(cover)
    }
}

fn mux_args(audio: &Path, cover: Option<&Path>, output: &Path, tags: &TrackTags, ext: &str) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
    ];
    if let Some(cover) = cover {
        args.push("-i".to_string());
        args.push(cover.to_string_lossy().to_string());
    }

    args.extend(["-map".to_string(), "0:a".to_string()]);
    if cover.is_some() {
        args.extend(["-map".to_string(), "1:0".to_string()]);
    }
    args.extend(["-c".to_string(), "copy".to_string()]);
    if ext == "mp3" {
        args.extend(["-id3v2_version".to_string(), "3".to_string()]);
    }

    let artist = tags.artist.as_deref().unwrap_or_default();
    for (key, value) in [("title", tags.title.as_str()), ("artist", artist), ("album", tags.title.as_str())] {
        args.push("-metadata".to_string());
        args.push(format!("{}={}", key, value));
    }

    if cover.is_some() {
        args.extend(["-disposition:v:0".to_string(), "attached_pic".to_string()]);
    }
    args.push(output.to_string_lossy().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(thumbnail: Option<&str>) -> TrackTags {
        TrackTags {
            title: "Song".to_string(),
            artist: Some("Artist".to_string()),
            thumbnail_url: thumbnail.map(str::to_string),
        }
    }

    /// Leaves only the original audio file behind
    fn assert_no_leftovers(dir: &Path) {
        let names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["song.mp3"]);
    }

    #[test]
    fn test_args_with_cover() {
        let args = mux_args(
            Path::new("/m/song.mp3"),
            Some(Path::new("/m/.cover-1.jpg")),
            Path::new("/m/.mux-1.mp3"),
            &tags(Some("https://i.ytimg.com/x.jpg")),
            "mp3",
        );
        assert!(args.windows(2).any(|w| w == ["-map", "1:0"]));
        assert!(args.windows(2).any(|w| w == ["-id3v2_version", "3"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "album=Song"]));
        assert!(args.windows(2).any(|w| w == ["-disposition:v:0", "attached_pic"]));
        assert_eq!(args.last().map(String::as_str), Some("/m/.mux-1.mp3"));
    }

    #[test]
    fn test_args_tags_only() {
        let args = mux_args(
            Path::new("/m/song.m4a"),
            None,
            Path::new("/m/.mux-1.m4a"),
            &tags(None),
            "m4a",
        );
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!args.contains(&"attached_pic".to_string()));
        assert!(!args.contains(&"-id3v2_version".to_string()));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("song.mp3");
        std::fs::write(&audio, b"original").unwrap();

        let muxer = MetadataMuxer::new(PathBuf::from("ffmpeg")).with_thumbnail_timeout(Duration::from_secs(2));
        let err = muxer
            .embed(&audio, &tags(Some("http://127.0.0.1:9/cover.jpg")))
            .await
            .unwrap_err();

        assert!(matches!(err, MuxError::Thumbnail(_)));
        assert_eq!(std::fs::read(&audio).unwrap(), b"original");
        assert_no_leftovers(dir.path());
    }

    #[tokio::test]
    async fn test_missing_transcoder_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("song.mp3");
        std::fs::write(&audio, b"original").unwrap();

        let muxer = MetadataMuxer::new(PathBuf::from("/nonexistent/ffmpeg"));
        let err = muxer.embed(&audio, &tags(None)).await.unwrap_err();

        assert!(matches!(err, MuxError::Transcoder(_)));
        assert_eq!(std::fs::read(&audio).unwrap(), b"original");
        assert_no_leftovers(dir.path());
    }

    #[cfg(unix)]
    fn fake_transcoder(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        crate::downloader::utils::make_executable(&path).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_mux_replaces_original() {
        let bin = tempfile::tempdir().unwrap();
        let ffmpeg = fake_transcoder(bin.path(), r#"for last; do :; done; printf muxed > "$last""#);

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("song.mp3");
        std::fs::write(&audio, b"original").unwrap();

        MetadataMuxer::new(ffmpeg).embed(&audio, &tags(None)).await.unwrap();

        assert_eq!(std::fs::read(&audio).unwrap(), b"muxed");
        assert_no_leftovers(dir.path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_transcoder_reports_stderr() {
        let bin = tempfile::tempdir().unwrap();
        let ffmpeg = fake_transcoder(bin.path(), "echo 'Invalid data found' >&2; exit 1");

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("song.mp3");
        std::fs::write(&audio, b"original").unwrap();

        let err = MetadataMuxer::new(ffmpeg).embed(&audio, &tags(None)).await.unwrap_err();
        assert!(err.to_string().contains("Invalid data found"));
        assert_eq!(std::fs::read(&audio).unwrap(), b"original");
        assert_no_leftovers(dir.path());
    }
}
