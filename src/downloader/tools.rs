// Transcoder (ffmpeg) locator
//
// Resolution order: bundled next to the program, `ffmpeg -version` on PATH,
// common install directories, then the user-supplied path. The first hit is
// cached for the process lifetime and only replaced on explicit request.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::errors::TranscoderNotFound;
use super::utils::{program_dir, run_output_with_timeout};

#[cfg(windows)]
pub const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Folder the Windows release zip unpacks into
pub const WINDOWS_BUNDLE_DIR: &str = "ffmpeg-master-latest-win64-gpl";

const PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TranscoderOrigin {
    Bundled,
    SystemPath,
    CommonInstallDir,
    UserSupplied,
    AutoInstalled,
}

impl TranscoderOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::SystemPath => "system PATH",
            Self::CommonInstallDir => "common install dir",
            Self::UserSupplied => "user supplied",
            Self::AutoInstalled => "auto-installed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscoderBinary {
    pub path: PathBuf,
    pub origin: TranscoderOrigin,
}

impl TranscoderBinary {
    pub fn program(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Where the locator looks
#[derive(Debug, Clone)]
pub struct SearchPaths {
    pub program_dir: PathBuf,
    /// Name run with `-version` for the PATH probe
    pub probe_program: String,
    pub common_dirs: Vec<PathBuf>,
    pub user_path: Option<PathBuf>,
}

impl SearchPaths {
    pub fn for_current_platform(user_path: Option<PathBuf>) -> Self {
        Self {
            program_dir: program_dir(),
            probe_program: "ffmpeg".to_string(),
            common_dirs: common_install_dirs(),
            user_path,
        }
    }

    /// Where a bundled or auto-installed binary sits relative to the program
    pub fn bundled_path(&self) -> PathBuf {
        bundled_path_in(&self.program_dir)
    }
}

pub fn bundled_path_in(program_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        program_dir.join(WINDOWS_BUNDLE_DIR).join("bin").join(FFMPEG_BIN)
    } else {
        program_dir.join("ffmpeg").join("bin").join(FFMPEG_BIN)
    }
}

#[cfg(windows)]
fn common_install_dirs() -> Vec<PathBuf> {
    let mut dirs_list = vec![
        PathBuf::from(r"C:\ffmpeg\bin"),
        PathBuf::from(r"C:\Program Files\ffmpeg\bin"),
        PathBuf::from(r"C:\Program Files (x86)\ffmpeg\bin"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        dirs_list.push(local.join("ffmpeg").join("bin"));
    }
    dirs_list
}

#[cfg(not(windows))]
fn common_install_dirs() -> Vec<PathBuf> {
    [
        "/usr/bin",
        "/usr/local/bin",
        "/opt/homebrew/bin",
        "/home/linuxbrew/.linuxbrew/bin",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

pub struct TranscoderLocator {
    search: SearchPaths,
    resolved: Mutex<Option<TranscoderBinary>>,
}

impl TranscoderLocator {
    pub fn new(search: SearchPaths) -> Self {
        Self {
            search,
            resolved: Mutex::new(None),
        }
    }

    /// Cached binary, or search once and cache the result
    pub async fn resolve(&self) -> Result<TranscoderBinary, TranscoderNotFound> {
        let mut guard = self.resolved.lock().await;
        if let Some(bin) = guard.as_ref() {
            return Ok(bin.clone());
        }

        match self.search().await {
            Some(bin) => {
                tracing::info!(
                    "[Locator] FFmpeg resolved: {} ({})",
                    bin.path.display(),
                    bin.origin.as_str()
                );
                *guard = Some(bin.clone());
                Ok(bin)
            }
            None => {
                tracing::warn!("[Locator] FFmpeg not found in any known location");
                Err(TranscoderNotFound::new())
            }
        }
    }

    /// Currently cached binary without searching
    pub async fn current(&self) -> Option<TranscoderBinary> {
        self.resolved.lock().await.clone()
    }

    /// Drop the cache and search again
    pub async fn re_resolve(&self) -> Result<TranscoderBinary, TranscoderNotFound> {
        self.resolved.lock().await.take();
        self.resolve().await
    }

    /// Replace the cached binary with a user-chosen file
    pub async fn set_user_path(&self, path: &Path) -> Result<TranscoderBinary, TranscoderNotFound> {
        if !path.is_file() {
            tracing::warn!("[Locator] User path {} is not a file", path.display());
            return Err(TranscoderNotFound::new());
        }
        let bin = TranscoderBinary {
            path: path.to_path_buf(),
            origin: TranscoderOrigin::UserSupplied,
        };
        *self.resolved.lock().await = Some(bin.clone());
        tracing::info!("[Locator] FFmpeg set by user: {}", path.display());
        Ok(bin)
    }

    /// Record a binary the installer just placed
    pub async fn set_installed(&self, path: PathBuf) -> TranscoderBinary {
        let bin = TranscoderBinary {
            path,
            origin: TranscoderOrigin::AutoInstalled,
        };
        *self.resolved.lock().await = Some(bin.clone());
        bin
    }

    /// Run `<ffmpeg> -version` and return its first line
    pub async fn check_installation(&self) -> Result<String, String> {
        let bin = self.resolve().await.map_err(|e| e.to_string())?;
        let out = run_output_with_timeout(&bin.program(), vec!["-version".to_string()], PROBE_TIMEOUT_SECS)
            .await?;
        if !out.status.success() {
            return Err(format!(
                "{} -version exited with {}",
                bin.path.display(),
                out.status
            ));
        }
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| "Empty version output".to_string())
    }

    async fn search(&self) -> Option<TranscoderBinary> {
        let bundled = self.search.bundled_path();
        if bundled.is_file() {
            return Some(TranscoderBinary {
                path: bundled,
                origin: TranscoderOrigin::Bundled,
            });
        }

        if let Some(path) = self.probe_on_path().await {
            return Some(TranscoderBinary {
                path,
                origin: TranscoderOrigin::SystemPath,
            });
        }

        if let Some(path) = self
            .search
            .common_dirs
            .iter()
            .map(|dir| dir.join(FFMPEG_BIN))
            .find(|p| p.is_file())
        {
            return Some(TranscoderBinary {
                path,
                origin: TranscoderOrigin::CommonInstallDir,
            });
        }

        self.search
            .user_path
            .as_ref()
            .filter(|p| p.is_file())
            .map(|p| TranscoderBinary {
                path: p.clone(),
                origin: TranscoderOrigin::UserSupplied,
            })
    }

    /// `ffmpeg -version` succeeds; pin the absolute path so later calls are stable
    async fn probe_on_path(&self) -> Option<PathBuf> {
        let probe = &self.search.probe_program;
        let out = run_output_with_timeout(probe, vec!["-version".to_string()], PROBE_TIMEOUT_SECS)
            .await
            .ok()?;
        if !out.status.success() {
            return None;
        }
        Some(which::which(probe).unwrap_or_else(|_| PathBuf::from(probe)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated(program_dir: &Path, user_path: Option<PathBuf>) -> SearchPaths {
        SearchPaths {
            program_dir: program_dir.to_path_buf(),
            probe_program: "ffmpeg-probe-that-does-not-exist".to_string(),
            common_dirs: vec![],
            user_path,
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[tokio::test]
    async fn test_bundled_wins_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let search = isolated(dir.path(), None);
        touch(&search.bundled_path());

        let locator = TranscoderLocator::new(search);
        let first = locator.resolve().await.unwrap();
        let second = locator.resolve().await.unwrap();

        assert_eq!(first.origin, TranscoderOrigin::Bundled);
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn test_common_dir_before_user_path() {
        let dir = tempfile::tempdir().unwrap();
        let common = dir.path().join("common");
        touch(&common.join(FFMPEG_BIN));
        let user = dir.path().join("user").join(FFMPEG_BIN);
        touch(&user);

        let mut search = isolated(&dir.path().join("app"), Some(user));
        search.common_dirs = vec![dir.path().join("empty"), common.clone()];

        let bin = TranscoderLocator::new(search).resolve().await.unwrap();
        assert_eq!(bin.origin, TranscoderOrigin::CommonInstallDir);
        assert_eq!(bin.path, common.join(FFMPEG_BIN));
    }

    #[tokio::test]
    async fn test_user_path_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("tools").join(FFMPEG_BIN);
        touch(&user);

        let locator = TranscoderLocator::new(isolated(&dir.path().join("app"), Some(user.clone())));
        let bin = locator.resolve().await.unwrap();
        assert_eq!(bin.origin, TranscoderOrigin::UserSupplied);
        assert_eq!(bin.path, user);
    }

    #[tokio::test]
    async fn test_not_found_carries_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let locator = TranscoderLocator::new(isolated(dir.path(), None));
        let err = locator.resolve().await.unwrap_err();
        assert!(err.guidance.contains("brew install ffmpeg"));
        assert!(locator.current().await.is_none());
    }

    #[tokio::test]
    async fn test_set_user_path_and_re_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let search = isolated(dir.path(), None);
        touch(&search.bundled_path());
        let custom = dir.path().join("custom-ffmpeg");
        touch(&custom);

        let locator = TranscoderLocator::new(search);
        assert!(locator.set_user_path(&dir.path().join("missing")).await.is_err());

        let bin = locator.set_user_path(&custom).await.unwrap();
        assert_eq!(bin.origin, TranscoderOrigin::UserSupplied);
        assert_eq!(locator.resolve().await.unwrap().path, custom);

        let again = locator.re_resolve().await.unwrap();
        assert_eq!(again.origin, TranscoderOrigin::Bundled);
    }

    #[tokio::test]
    async fn test_set_installed_marks_origin() {
        let dir = tempfile::tempdir().unwrap();
        let locator = TranscoderLocator::new(isolated(dir.path(), None));
        let bin = locator.set_installed(dir.path().join(FFMPEG_BIN)).await;
        assert_eq!(bin.origin, TranscoderOrigin::AutoInstalled);
        assert_eq!(locator.resolve().await.unwrap(), bin);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_installation_reads_first_line() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\necho 'ffmpeg version 6.1 Copyright'\necho second\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let locator = TranscoderLocator::new(isolated(dir.path(), None));
        locator.set_user_path(&fake).await.unwrap();
        assert_eq!(
            locator.check_installation().await.unwrap(),
            "ffmpeg version 6.1 Copyright"
        );
    }
}
