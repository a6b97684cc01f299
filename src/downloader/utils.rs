// Helper functions shared by the locator, installer, extractor and muxer

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

/// Run to completion and collect both pipes.
/// On timeout the future is dropped and `kill_on_drop` takes the child down with it.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| format!("Failed to wait for {}: {}", program, e)),
        Err(_) => Err(format!("Timed out after {}s", timeout_secs)),
    }
}

/// First stdout line of a successful `<program> <args>` run, if any
pub async fn probe_version(program: &str, args: &[&str], timeout_secs: u64) -> Option<String> {
    let args = args.iter().map(|a| a.to_string()).collect();
    match run_output_with_timeout(program, args, timeout_secs).await {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        _ => None,
    }
}

/// HTTP client with a hard request timeout and optional proxy
pub fn http_client(request_timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client, String> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(request_timeout.min(Duration::from_secs(30)))
        .timeout(request_timeout)
        .user_agent(concat!("youtube-audio-downloader/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| format!("Invalid proxy URL {}: {}", proxy_url, e))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Stream a GET response body into `dest`.
/// Each chunk must arrive within `inactivity`; the caller owns cleanup of `dest` on error.
pub async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    inactivity: Duration,
) -> Result<u64, String> {
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| format!("GET {} failed: {}", url, e))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;

    let mut written: u64 = 0;
    loop {
        let chunk = match timeout(inactivity, response.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(format!("Read from {} failed: {}", url, e)),
            Err(_) => {
                return Err(format!(
                    "No data from {} for {}s ({} bytes received)",
                    url,
                    inactivity.as_secs(),
                    written
                ))
            }
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Write to {} failed: {}", dest.display(), e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| format!("Flush {} failed: {}", dest.display(), e))?;

    if written == 0 {
        return Err(format!("Empty response from {}", url));
    }
    Ok(written)
}

/// Directory holding the running program; bundled and installed binaries live here
pub fn program_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// chmod 0o755 where that matters
#[cfg(unix)]
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
