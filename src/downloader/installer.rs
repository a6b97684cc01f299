// FFmpeg auto-installer
//
// Only runs when the locator came up empty and the caller opted in.
// Archives are staged in a temp dir beside the program and moved into place
// in one rename; the staging dir is dropped (and deleted) on every error path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use super::errors::InstallError;
use super::tools::{TranscoderBinary, TranscoderLocator, FFMPEG_BIN, WINDOWS_BUNDLE_DIR};
use super::utils::{download_to_file, http_client, make_executable, probe_version, run_output_with_timeout};

pub const WINDOWS_ZIP_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip";
pub const MACOS_ZIP_URL: &str = "https://evermeet.cx/ffmpeg/getrelease/ffmpeg/zip";
pub const LINUX_TAR_URL: &str =
    "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz";

const REFRESH_TIMEOUT_SECS: u64 = 30;
const PACKAGE_INSTALL_TIMEOUT_SECS: u64 = 300;
const CHUNK_INACTIVITY: Duration = Duration::from_secs(60);

/// Progress messages for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    TryingPackageManager(String),
    PackageManagerFailed(String),
    Downloading(String),
    Extracting,
    Installed(PathBuf),
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TryingPackageManager(pm) => write!(f, "Installing FFmpeg with {}...", pm),
            Self::PackageManagerFailed(pm) => write!(f, "{} could not install FFmpeg", pm),
            Self::Downloading(url) => write!(f, "Downloading {}", url),
            Self::Extracting => write!(f, "Extracting FFmpeg..."),
            Self::Installed(path) => write!(f, "FFmpeg installed at {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarXz,
}

/// One archive-based install route
#[derive(Debug, Clone)]
struct ArchivePlan {
    url: String,
    kind: ArchiveKind,
    /// Directory under the program dir that gets moved into place
    install_root: PathBuf,
}

impl ArchivePlan {
    fn binary_path(&self, program_dir: &Path) -> PathBuf {
        program_dir.join(&self.install_root).join("bin").join(FFMPEG_BIN)
    }
}

/// System package manager invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManager {
    pub name: &'static str,
    pub refresh: Vec<&'static str>,
    pub install: Vec<&'static str>,
}

/// Linux package managers, highest priority first
pub fn linux_package_managers() -> Vec<PackageManager> {
    vec![
        PackageManager {
            name: "apt-get",
            refresh: vec!["sudo", "apt-get", "update"],
            install: vec!["sudo", "apt-get", "install", "-y", "ffmpeg"],
        },
        PackageManager {
            name: "yum",
            refresh: vec!["sudo", "yum", "check-update"],
            install: vec!["sudo", "yum", "install", "-y", "ffmpeg"],
        },
        PackageManager {
            name: "dnf",
            refresh: vec!["sudo", "dnf", "check-update"],
            install: vec!["sudo", "dnf", "install", "-y", "ffmpeg"],
        },
        PackageManager {
            name: "pacman",
            refresh: vec!["sudo", "pacman", "-Sy"],
            install: vec!["sudo", "pacman", "-S", "--noconfirm", "ffmpeg"],
        },
    ]
}

pub struct FfmpegInstaller {
    program_dir: PathBuf,
    download_timeout: Duration,
    proxy: Option<String>,
}

impl FfmpegInstaller {
    pub fn new(program_dir: PathBuf, download_timeout: Duration) -> Self {
        Self {
            program_dir,
            download_timeout,
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Install for the current OS and return the binary path
    pub async fn install(&self, on_step: &(dyn Fn(InstallStep) + Send + Sync)) -> Result<PathBuf, InstallError> {
        let path = if cfg!(target_os = "windows") {
            self.install_from_archive(&windows_plan(), on_step).await?
        } else if cfg!(target_os = "macos") {
            self.install_macos(on_step).await?
        } else if cfg!(target_os = "linux") {
            self.install_linux(on_step).await?
        } else {
            return Err(InstallError::UnsupportedPlatform(std::env::consts::OS.to_string()));
        };

        tracing::info!("[Installer] FFmpeg installed at {}", path.display());
        on_step(InstallStep::Installed(path.clone()));
        Ok(path)
    }

    async fn install_macos(&self, on_step: &(dyn Fn(InstallStep) + Send + Sync)) -> Result<PathBuf, InstallError> {
        if probe_version("brew", &["--version"], REFRESH_TIMEOUT_SECS).await.is_some() {
            on_step(InstallStep::TryingPackageManager("brew".to_string()));
            let args = vec!["install".to_string(), "ffmpeg".to_string()];
            match run_output_with_timeout("brew", args, PACKAGE_INSTALL_TIMEOUT_SECS).await {
                Ok(out) if out.status.success() => {
                    if let Ok(path) = which::which("ffmpeg") {
                        return Ok(path);
                    }
                }
                Ok(out) => {
                    tracing::warn!(
                        "[Installer] brew install failed: {}",
                        String::from_utf8_lossy(&out.stderr).trim()
                    );
                }
                Err(e) => tracing::warn!("[Installer] brew install failed: {}", e),
            }
            on_step(InstallStep::PackageManagerFailed("brew".to_string()));
        } else {
            tracing::info!("[Installer] Homebrew not available, using static build");
        }

        self.install_from_archive(&macos_plan(), on_step).await
    }

    async fn install_linux(&self, on_step: &(dyn Fn(InstallStep) + Send + Sync)) -> Result<PathBuf, InstallError> {
        for pm in linux_package_managers() {
            if which::which(pm.name).is_err() {
                continue;
            }
            on_step(InstallStep::TryingPackageManager(pm.name.to_string()));
            if let Some(path) = run_package_manager(&pm).await {
                return Ok(path);
            }
            on_step(InstallStep::PackageManagerFailed(pm.name.to_string()));
        }

        self.install_from_archive(&linux_plan(), on_step).await
    }

    async fn install_from_archive(
        &self,
        plan: &ArchivePlan,
        on_step: &(dyn Fn(InstallStep) + Send + Sync),
    ) -> Result<PathBuf, InstallError> {
        tokio::fs::create_dir_all(&self.program_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(".ffmpeg-install-")
            .tempdir_in(&self.program_dir)?;

        on_step(InstallStep::Downloading(plan.url.clone()));
        let archive = staging.path().join(match plan.kind {
            ArchiveKind::Zip => "ffmpeg.zip",
            ArchiveKind::TarXz => "ffmpeg.tar.xz",
        });
        let client = http_client(self.download_timeout, self.proxy.as_deref()).map_err(|message| {
            InstallError::Download {
                url: plan.url.clone(),
                message,
            }
        })?;
        download_to_file(&client, &plan.url, &archive, CHUNK_INACTIVITY)
            .await
            .map_err(|message| InstallError::Download {
                url: plan.url.clone(),
                message,
            })?;

        on_step(InstallStep::Extracting);
        let staged_root = staging.path().join(&plan.install_root);
        let staged_bin = staged_root.join("bin");
        tokio::fs::create_dir_all(&staged_bin).await?;

        match plan.kind {
            ArchiveKind::Zip => {
                let archive = archive.clone();
                let dest = staged_bin.clone();
                tokio::task::spawn_blocking(move || unpack_zip(&archive, &dest))
                    .await
                    .map_err(|e| InstallError::Extract(e.to_string()))??;
            }
            ArchiveKind::TarXz => unpack_tar_xz(&archive, staging.path(), &staged_bin).await?,
        }

        let staged_ffmpeg = staged_bin.join(FFMPEG_BIN);
        if !staged_ffmpeg.is_file() {
            return Err(InstallError::MissingBinary(staged_ffmpeg));
        }
        for entry in std::fs::read_dir(&staged_bin)? {
            make_executable(&entry?.path())?;
        }

        let final_root = self.program_dir.join(&plan.install_root);
        if final_root.exists() {
            // leftover from an earlier broken install; it has no usable binary or we would not be here
            tokio::fs::remove_dir_all(&final_root).await?;
        }
        tokio::fs::rename(&staged_root, &final_root).await?;

        Ok(plan.binary_path(&self.program_dir))
    }
}

/// Resolve, and if that fails and `installer` is given, install and record the result
pub async fn ensure_transcoder(
    locator: &TranscoderLocator,
    installer: Option<&FfmpegInstaller>,
    on_step: &(dyn Fn(InstallStep) + Send + Sync),
) -> Result<TranscoderBinary, InstallError> {
    let not_found = match locator.resolve().await {
        Ok(bin) => return Ok(bin),
        Err(e) => e,
    };
    let Some(installer) = installer else {
        return Err(not_found.into());
    };

    tracing::info!("[Installer] FFmpeg missing, installing");
    let path = installer.install(on_step).await?;
    Ok(locator.set_installed(path).await)
}

fn windows_plan() -> ArchivePlan {
    ArchivePlan {
        url: WINDOWS_ZIP_URL.to_string(),
        kind: ArchiveKind::Zip,
        install_root: PathBuf::from(WINDOWS_BUNDLE_DIR),
    }
}

fn macos_plan() -> ArchivePlan {
    ArchivePlan {
        url: MACOS_ZIP_URL.to_string(),
        kind: ArchiveKind::Zip,
        install_root: PathBuf::from("ffmpeg"),
    }
}

fn linux_plan() -> ArchivePlan {
    ArchivePlan {
        url: LINUX_TAR_URL.to_string(),
        kind: ArchiveKind::TarXz,
        install_root: PathBuf::from("ffmpeg"),
    }
}

/// Names of the files we keep from an archive
fn wanted_file(name: &str) -> bool {
    matches!(name, "ffmpeg" | "ffprobe" | "ffmpeg.exe" | "ffprobe.exe")
}

async fn run_package_manager(pm: &PackageManager) -> Option<PathBuf> {
    let to_args = |cmd: &[&str]| cmd[1..].iter().map(|s| s.to_string()).collect::<Vec<_>>();

    // refresh failures are not fatal; yum/dnf check-update exits 100 when updates exist
    if let Err(e) = run_output_with_timeout(pm.refresh[0], to_args(&pm.refresh), REFRESH_TIMEOUT_SECS).await {
        tracing::debug!("[Installer] {} refresh: {}", pm.name, e);
    }

    match run_output_with_timeout(pm.install[0], to_args(&pm.install), PACKAGE_INSTALL_TIMEOUT_SECS).await {
        Ok(out) if out.status.success() => which::which("ffmpeg").ok(),
        Ok(out) => {
            tracing::warn!(
                "[Installer] {} failed: {}",
                pm.name,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            None
        }
        Err(e) => {
            tracing::warn!("[Installer] {} failed: {}", pm.name, e);
            None
        }
    }
}

/// Copy the ffmpeg/ffprobe entries of a zip into `dest`, flattening paths
fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), InstallError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| InstallError::Extract(format!("Failed to read archive: {}", e)))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| InstallError::Extract(format!("Failed to read archive entry: {}", e)))?;
        if !entry.is_file() {
            continue;
        }

        let normalized = entry.name().replace('\\', "/").to_lowercase();
        let file_name = normalized.rsplit('/').next().unwrap_or_default().to_string();
        if !wanted_file(&file_name) {
            continue;
        }

        let mut output = std::fs::File::create(dest.join(&file_name))?;
        std::io::copy(&mut entry, &mut output)?;
    }

    Ok(())
}

/// Unpack with the system `tar` and move the binaries into `dest`
async fn unpack_tar_xz(archive: &Path, staging: &Path, dest: &Path) -> Result<(), InstallError> {
    let unpacked = staging.join("unpacked");
    tokio::fs::create_dir_all(&unpacked).await?;

    let args = vec![
        "-xJf".to_string(),
        archive.to_string_lossy().to_string(),
        "-C".to_string(),
        unpacked.to_string_lossy().to_string(),
    ];
    let out = run_output_with_timeout("tar", args, PACKAGE_INSTALL_TIMEOUT_SECS)
        .await
        .map_err(InstallError::Extract)?;
    if !out.status.success() {
        return Err(InstallError::Extract(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }

    for name in ["ffmpeg", "ffprobe"] {
        if let Some(found) = find_file_named(&unpacked, name, 3) {
            tokio::fs::rename(&found, dest.join(name)).await?;
        }
    }
    Ok(())
}

/// Depth-limited search for a regular file called `name`; depth 0 means `dir` itself
fn find_file_named(dir: &Path, name: &str, depth: usize) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth + 1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_unpack_zip_keeps_only_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(
            &archive,
            &[
                ("ffmpeg-master-latest-win64-gpl/bin/ffmpeg.exe", b"exe"),
                ("ffmpeg-master-latest-win64-gpl/bin/ffprobe.exe", b"probe"),
                ("ffmpeg-master-latest-win64-gpl/doc/ffmpeg.html", b"doc"),
            ],
        );
        let dest = dir.path().join("bin");
        std::fs::create_dir_all(&dest).unwrap();

        unpack_zip(&archive, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("ffmpeg.exe")).unwrap(), b"exe");
        assert!(dest.join("ffprobe.exe").exists());
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 2);
    }

    #[test]
    fn test_unpack_zip_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(
            unpack_zip(&archive, dir.path()),
            Err(InstallError::Extract(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let installer = FfmpegInstaller::new(dir.path().to_path_buf(), Duration::from_secs(2));
        let plan = ArchivePlan {
            url: "http://127.0.0.1:9/ffmpeg.zip".to_string(),
            kind: ArchiveKind::Zip,
            install_root: PathBuf::from("ffmpeg"),
        };

        let steps = std::sync::Mutex::new(Vec::new());
        let err = installer
            .install_from_archive(&plan, &|s| steps.lock().unwrap().push(s))
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Download { .. }));
        assert!(err.to_string().contains("Install FFmpeg manually"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(
            steps.lock().unwrap().first(),
            Some(&InstallStep::Downloading(plan.url.clone()))
        );
    }

    /// Answer one GET with `body`, then close
    async fn serve_once(body: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/ffmpeg.zip", addr)
    }

    #[tokio::test]
    async fn test_archive_without_binary_leaves_nothing_behind() {
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("docs.zip");
        build_zip(&archive, &[("ffmpeg-build/doc/readme.txt", b"no binaries here")]);
        let url = serve_once(std::fs::read(&archive).unwrap()).await;

        let dir = tempfile::tempdir().unwrap();
        let installer = FfmpegInstaller::new(dir.path().to_path_buf(), Duration::from_secs(10));
        let plan = ArchivePlan {
            url,
            kind: ArchiveKind::Zip,
            install_root: PathBuf::from("ffmpeg"),
        };

        let steps = std::sync::Mutex::new(Vec::new());
        let err = installer
            .install_from_archive(&plan, &|s| steps.lock().unwrap().push(s))
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::MissingBinary(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(steps.lock().unwrap().contains(&InstallStep::Extracting));
    }

    #[tokio::test]
    async fn test_corrupt_archive_leaves_nothing_behind() {
        let url = serve_once(b"this is not a zip archive".to_vec()).await;

        let dir = tempfile::tempdir().unwrap();
        let installer = FfmpegInstaller::new(dir.path().to_path_buf(), Duration::from_secs(10));
        let plan = ArchivePlan {
            url,
            kind: ArchiveKind::Zip,
            install_root: PathBuf::from("ffmpeg"),
        };

        let err = installer.install_from_archive(&plan, &|_| {}).await.unwrap_err();

        assert!(matches!(err, InstallError::Extract(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_without_opt_in_reports_not_found() {
        use crate::downloader::tools::SearchPaths;

        let dir = tempfile::tempdir().unwrap();
        let locator = TranscoderLocator::new(SearchPaths {
            program_dir: dir.path().to_path_buf(),
            probe_program: "ffmpeg-probe-that-does-not-exist".to_string(),
            common_dirs: vec![],
            user_path: None,
        });

        let err = ensure_transcoder(&locator, None, &|_| {}).await.unwrap_err();
        assert!(matches!(err, InstallError::NotFound(_)));
    }

    #[test]
    fn test_find_file_named_descends() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ffmpeg-7.0.2-amd64-static");
        std::fs::create_dir_all(nested.join("model")).unwrap();
        std::fs::write(nested.join("ffmpeg"), b"bin").unwrap();

        std::fs::write(nested.join("model").join("ffmpeg.txt"), b"doc").unwrap();

        assert_eq!(find_file_named(dir.path(), "ffmpeg", 2), Some(nested.join("ffmpeg")));
        assert_eq!(find_file_named(dir.path(), "ffmpeg", 0), None);
        assert_eq!(find_file_named(dir.path(), "ffmpeg.txt", 1), None);
    }

    #[test]
    fn test_package_manager_order() {
        let names: Vec<_> = linux_package_managers().iter().map(|pm| pm.name).collect();
        assert_eq!(names, ["apt-get", "yum", "dnf", "pacman"]);
        assert!(linux_package_managers()
            .iter()
            .all(|pm| pm.install[0] == "sudo" && pm.install.contains(&"ffmpeg")));
    }

    #[test]
    fn test_plan_layouts() {
        let root = Path::new("/app");
        assert_eq!(
            windows_plan().binary_path(root),
            root.join(WINDOWS_BUNDLE_DIR).join("bin").join(FFMPEG_BIN)
        );
        assert_eq!(linux_plan().binary_path(root), root.join("ffmpeg/bin").join(FFMPEG_BIN));
    }
}
