//! Rendering surface backed by headless Chromium.
//!
//! Pages are opened straight from the extracted book on disk so relative
//! stylesheets, fonts and images resolve the way a reader would see them.

mod document;
pub mod launch;
pub mod script;

use std::path::{Path, PathBuf};

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use url::Url;

use accessible_core::error::{AccessibleError, Result};
use accessible_core::surface::RenderSurface;

pub use document::{ChromeDocument, NodeHandle};
pub use launch::{find_browser_executable, LaunchOptions};

pub struct ChromeSurface {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    root: PathBuf,
}

impl ChromeSurface {
    /// Launch a browser serving pages from `root`, the extracted archive.
    pub async fn launch(root: impl Into<PathBuf>, options: &LaunchOptions) -> Result<Self> {
        let root = root.into();
        let (browser, handler) = launch::launch(options).await?;
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(AccessibleError::Surface(format!("failed to open a tab: {}", e)));
            }
        };
        info!("Browser ready, serving pages from {}", root.display());
        Ok(Self {
            browser,
            handler,
            page,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn page_url(&self, page_path: &str) -> Result<Url> {
        let path = page_path
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        Url::from_file_path(&path).map_err(|_| {
            AccessibleError::Surface(format!("cannot build a file URL for {}", path.display()))
        })
    }

    /// Close the browser and wait for the process to exit.
    pub async fn close(&mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| AccessibleError::Surface(format!("failed to close browser: {}", e)))?;
        if let Err(e) = self.browser.wait().await {
            warn!("Browser did not exit cleanly: {}", e);
        }
        Ok(())
    }
}

impl RenderSurface for ChromeSurface {
    type Document = ChromeDocument;

    async fn load(&mut self, page_path: &str) -> Result<ChromeDocument> {
        let url = self.page_url(page_path)?;
        debug!("Loading {}", url);
        self.page
            .goto(url.as_str())
            .await
            .map_err(|e| AccessibleError::Surface(format!("failed to load {}: {}", page_path, e)))?;
        document::wait_until_ready(&self.page, page_path).await?;
        Ok(ChromeDocument::new(self.page.clone(), page_path))
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
