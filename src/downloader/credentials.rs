// Optional credential providers (browser cookies for the extraction service)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::errors::CredentialError;

pub const SUPPORTED_BROWSERS: &[&str] = &[
    "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari", "vivaldi",
];

const SAFARI_GUIDANCE: &str = "grant this program Full Disk Access in System Settings > \
     Privacy & Security, or pick Chrome or Firefox instead";

/// What the extraction service gets told to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    Browser(String),
    File(PathBuf),
}

impl CookieSource {
    pub fn service_args(&self) -> Vec<String> {
        match self {
            Self::Browser(browser) => vec!["--cookies-from-browser".to_string(), browser.clone()],
            Self::File(path) => vec!["--cookies".to_string(), path.to_string_lossy().to_string()],
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Label for logs and degradation notices
    fn name(&self) -> String;

    async fn cookies(&self) -> Result<CookieSource, CredentialError>;
}

/// Session cookies read by the service from a named browser profile
pub struct BrowserCookies {
    browser: String,
    /// Store we check for readability before handing the browser to the service
    store: Option<PathBuf>,
}

impl BrowserCookies {
    pub fn new(browser: &str) -> Self {
        let browser = browser.trim().to_lowercase();
        let store = default_store(&browser);
        Self { browser, store }
    }

    pub fn with_cookie_store(mut self, store: PathBuf) -> Self {
        self.store = Some(store);
        self
    }
}

/// Safari keeps cookies in a sandboxed container that macOS guards with TCC
fn default_store(browser: &str) -> Option<PathBuf> {
    if cfg!(target_os = "macos") && browser == "safari" {
        dirs::home_dir().map(|home| {
            home.join("Library/Containers/com.apple.Safari/Data/Library/Cookies/Cookies.binarycookies")
        })
    } else {
        None
    }
}

fn check_store(browser: &str, store: &Path) -> Result<(), CredentialError> {
    std::fs::File::open(store)
        .map(|_| ())
        .map_err(|e| classify_store_error(browser, store, e))
}

fn classify_store_error(browser: &str, store: &Path, err: std::io::Error) -> CredentialError {
    match err.kind() {
        ErrorKind::PermissionDenied => CredentialError::PermissionDenied {
            browser: browser.to_string(),
            guidance: if browser == "safari" {
                SAFARI_GUIDANCE.to_string()
            } else {
                format!("allow this program to read {}", store.display())
            },
        },
        _ => CredentialError::StoreUnreadable(format!("{}: {}", store.display(), err)),
    }
}

#[async_trait]
impl CredentialProvider for BrowserCookies {
    fn name(&self) -> String {
        format!("{} cookies", self.browser)
    }

    async fn cookies(&self) -> Result<CookieSource, CredentialError> {
        if !SUPPORTED_BROWSERS.contains(&self.browser.as_str()) {
            return Err(CredentialError::UnsupportedBrowser(self.browser.clone()));
        }
        if let Some(store) = &self.store {
            check_store(&self.browser, store)?;
        }
        Ok(CookieSource::Browser(self.browser.clone()))
    }
}

/// Netscape-format cookies.txt exported by the user
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CredentialProvider for CookieFile {
    fn name(&self) -> String {
        format!("cookie file {}", self.path.display())
    }

    async fn cookies(&self) -> Result<CookieSource, CredentialError> {
        if !self.path.is_file() {
            return Err(CredentialError::FileNotFound(self.path.clone()));
        }
        Ok(CookieSource::File(self.path.clone()))
    }
}
