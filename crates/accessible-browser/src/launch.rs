//! Headless Chromium discovery and launch.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use accessible_core::error::{AccessibleError, Result};

pub const CHROMIUM_PATH_ENV: &str = "CHROMIUM_PATH";

/// How the browser is started.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit executable; found automatically when `None`.
    pub executable: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub request_timeout_secs: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            viewport_width: 1000,
            viewport_height: 1400,
            request_timeout_secs: 30,
        }
    }
}

fn candidate_paths() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    }
}

/// `$CHROMIUM_PATH` when it exists, otherwise the first installed browser
/// from the usual locations.
pub fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from {}: {}", CHROMIUM_PATH_ENV, path.display());
            return Ok(path);
        }
        warn!(
            "{} points to a missing file: {}",
            CHROMIUM_PATH_ENV,
            path.display()
        );
    }

    candidate_paths()
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .inspect(|path| info!("Found browser at {}", path.display()))
        .ok_or_else(|| {
            AccessibleError::Surface(format!(
                "no Chrome/Chromium executable found; set {}",
                CHROMIUM_PATH_ENV
            ))
        })
}

/// Start the browser and spawn its event loop. The returned task must be
/// aborted once the browser is no longer needed.
pub async fn launch(options: &LaunchOptions) -> Result<(Browser, JoinHandle<()>)> {
    let executable = match &options.executable {
        Some(path) => path.clone(),
        None => find_browser_executable()?,
    };

    let config = BrowserConfig::builder()
        .chrome_executable(executable)
        .request_timeout(Duration::from_secs(options.request_timeout_secs))
        .window_size(options.viewport_width, options.viewport_height)
        .viewport(None)
        .arg("--allow-file-access-from-files")
        .arg("--disable-extensions")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .build()
        .map_err(|e| AccessibleError::Surface(format!("invalid browser config: {}", e)))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AccessibleError::Surface(format!("failed to launch browser: {}", e)))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                error!("Browser handler error: {:?}", e);
            }
        }
        debug!("Browser event handler finished");
    });

    Ok((browser, handler_task))
}
