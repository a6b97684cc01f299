// User settings: JSON file under the platform config dir, then env overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::downloader::format_selector::QualityChoice;
use crate::downloader::progress::EstimatorSettings;

pub const APP_DIR: &str = "youtube-audio-downloader";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("No config directory on this platform")]
    NoConfigDir,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub quality: QualityChoice,
    /// Pin one audio format id from the format listing
    pub format_id: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    /// Allow the installer to run when no transcoder is found
    pub auto_install: bool,
    pub ytdlp_path: Option<PathBuf>,
    pub proxy: Option<String>,
    pub cookies_browser: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub socket_timeout_secs: u32,
    pub metadata_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub thumbnail_timeout_secs: u64,
    pub estimator: EstimatorSettings,
    pub embed_metadata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            quality: QualityChoice::default(),
            format_id: None,
            ffmpeg_path: None,
            auto_install: false,
            ytdlp_path: None,
            proxy: None,
            cookies_browser: None,
            cookies_file: None,
            socket_timeout_secs: 30,
            metadata_timeout_secs: 60,
            install_timeout_secs: 300,
            thumbnail_timeout_secs: 10,
            estimator: EstimatorSettings::default(),
            embed_metadata: true,
        }
    }
}

pub fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"))
}

impl Settings {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Settings file if present, defaults otherwise, then env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match Self::config_path() {
            Ok(path) => Self::load_or_init(&path)?,
            Err(_) => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// A missing file is seeded with the defaults so there is something to edit
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load_from(path);
        }
        let settings = Self::default();
        match settings.save_to(path) {
            Ok(()) => tracing::info!("[Config] Wrote default settings to {}", path.display()),
            Err(e) => tracing::warn!("[Config] {}", e),
        }
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("[Config] Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| write_err(e.to_string()))
    }

    /// `lookup` abstracts the environment so tests never touch process state
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = non_empty("YTAUDIO_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty("YTAUDIO_FFMPEG") {
            self.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty("YTAUDIO_YTDLP") {
            self.ytdlp_path = Some(PathBuf::from(path));
        }
        if let Some(proxy) = non_empty("YTAUDIO_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(browser) = non_empty("YTAUDIO_COOKIES_BROWSER") {
            self.cookies_browser = Some(browser);
        }
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_secs(self.thumbnail_timeout_secs)
    }
}
