//! Conversion session and workflow driver.
//!
//! One [`ConversionSession`] per ebook. The [`WorkflowDriver`] takes pages off
//! the session one at a time: load into the rendering surface, transform,
//! commit. Nothing is committed for a page that fails, so a session only ever
//! holds results of fully converted pages.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use crate::error::{AccessibleError, Result};
use crate::model::{ConvertedImage, PackageBatch, PageContext, PageConversionResult, STYLESHEET_NAME};
use crate::paths;
use crate::surface::{ArchiveStore, PageTransform, ProgressReporter, RenderSurface, SourceFetch};
use crate::timeout::with_timeout;

/// State of converting one ebook.
#[derive(Debug, Clone)]
pub struct ConversionSession {
    pending_pages: VecDeque<String>,
    produced_images: Vec<ConvertedImage>,
    updated_pages: BTreeMap<String, String>,
    /// Archive path of the asset directory, e.g. `OEBPS/kindle-accessible`.
    asset_dir: String,
    stylesheet: String,
    pre_css: String,
    base_names: HashMap<String, String>,
    total_pages: usize,
}

impl ConversionSession {
    /// `pages` are archive paths in processing order.
    pub fn new(
        pages: Vec<String>,
        asset_dir: impl Into<String>,
        stylesheet: impl Into<String>,
        pre_css: impl Into<String>,
    ) -> Self {
        let base_names = unique_base_names(&pages);
        let total_pages = pages.len();
        Self {
            pending_pages: pages.into(),
            produced_images: Vec::new(),
            updated_pages: BTreeMap::new(),
            asset_dir: asset_dir.into(),
            stylesheet: stylesheet.into(),
            pre_css: pre_css.into(),
            base_names,
            total_pages,
        }
    }

    pub fn pending_pages(&self) -> impl Iterator<Item = &str> {
        self.pending_pages.iter().map(String::as_str)
    }

    pub fn current_page(&self) -> Option<&str> {
        self.pending_pages.front().map(String::as_str)
    }

    pub fn produced_images(&self) -> &[ConvertedImage] {
        &self.produced_images
    }

    pub fn updated_pages(&self) -> &BTreeMap<String, String> {
        &self.updated_pages
    }

    pub fn asset_dir(&self) -> &str {
        &self.asset_dir
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Fraction of pages no longer pending.
    pub fn progress(&self) -> f64 {
        if self.total_pages == 0 {
            return 1.0;
        }
        (self.total_pages - self.pending_pages.len()) as f64 / self.total_pages as f64
    }

    /// Everything the page transformer needs to know about `page`.
    pub fn page_context(&self, page: &str) -> PageContext {
        let page_base_name = self
            .base_names
            .get(page)
            .cloned()
            .unwrap_or_else(|| paths::page_base_name(page).to_string());
        PageContext {
            page_path: page.to_string(),
            asset_dir: paths::relative_href(paths::parent_dir(page), &self.asset_dir),
            page_base_name,
            pre_css: self.pre_css.clone(),
        }
    }

    /// Record the result for the page at the head of the queue.
    pub fn commit(&mut self, page: &str, result: PageConversionResult) -> Result<()> {
        if self.current_page() != Some(page) {
            return Err(AccessibleError::Other(format!(
                "cannot commit '{}': it is not the current page",
                page
            )));
        }
        self.pending_pages.pop_front();

        debug!("{}: {} image(s)", page, result.images.len());
        if !result.is_unchanged() {
            self.updated_pages.insert(page.to_string(), result.updated_html);
        }
        self.produced_images.extend(result.images);
        Ok(())
    }

    /// Drop the current page without recording anything.
    pub fn skip_current(&mut self) -> Option<String> {
        let page = self.pending_pages.pop_front();
        if let Some(ref p) = page {
            warn!("Skipping page {}", p);
        }
        page
    }

    pub fn is_complete(&self) -> bool {
        self.pending_pages.is_empty() && !self.produced_images.is_empty()
    }

    /// Files to write back: the shared stylesheet, every updated page at its
    /// original path, then every image under the asset directory.
    pub fn package(&self) -> Result<PackageBatch> {
        if !self.is_complete() {
            return Err(AccessibleError::Other(format!(
                "session is not complete ({} page(s) pending, {} image(s))",
                self.pending_pages.len(),
                self.produced_images.len()
            )));
        }

        let mut batch = PackageBatch::default();
        batch.files.push((
            paths::join(&self.asset_dir, STYLESHEET_NAME),
            self.stylesheet.as_bytes().to_vec(),
        ));
        for (page, html) in &self.updated_pages {
            batch.files.push((page.clone(), html.as_bytes().to_vec()));
        }
        for image in &self.produced_images {
            let path = paths::join(&self.asset_dir, image.file_name());
            if batch.files.iter().any(|(p, _)| *p == path) {
                return Err(AccessibleError::Archive(format!(
                    "duplicate image entry {}",
                    path
                )));
            }
            batch.files.push((path, image.image_bytes.clone()));
        }
        Ok(batch)
    }

    /// Write the package into `archive` and return the rebuilt archive bytes.
    ///
    /// `Ok(None)` when every page is done but nothing matched anywhere.
    pub fn finish<A: ArchiveStore>(self, archive: &mut A) -> Result<Option<Vec<u8>>> {
        if !self.pending_pages.is_empty() {
            return Err(AccessibleError::Other(format!(
                "{} page(s) still pending",
                self.pending_pages.len()
            )));
        }
        if self.produced_images.is_empty() {
            info!("No elements matched; nothing to repackage");
            return Ok(None);
        }

        let batch = self.package()?;
        info!(
            "Repackaging {} page(s), {} image(s)",
            self.updated_pages.len(),
            self.produced_images.len()
        );
        for (path, bytes) in batch.files {
            archive.add_or_replace_entry(&path, bytes)?;
        }
        archive.to_bytes().map(Some)
    }
}

/// Page base names, suffixed `-2`, `-3`, ... when two pages in different
/// directories share one. A suffixed name never equals another page's own
/// base name.
fn unique_base_names(pages: &[String]) -> HashMap<String, String> {
    let raw: HashSet<&str> = pages.iter().map(|p| paths::page_base_name(p)).collect();
    let mut assigned: HashSet<String> = HashSet::new();
    let mut names = HashMap::new();
    for page in pages {
        let base = paths::page_base_name(page);
        let name = if assigned.contains(base) {
            (2..)
                .map(|n| format!("{}-{}", base, n))
                .find(|c| !raw.contains(c.as_str()) && !assigned.contains(c))
                .unwrap_or_else(|| base.to_string())
        } else {
            base.to_string()
        };
        assigned.insert(name.clone());
        names.insert(page.clone(), name);
    }
    names
}

/// What to do when a page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Stop at the first failed page.
    #[default]
    Abort,
    /// Skip pages that timed out; stop on any other failure.
    Skip,
}

/// Outcome of [`WorkflowDriver::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub converted: usize,
    pub skipped: Vec<String>,
}

/// Feeds pages from a session through a rendering surface and a page transform.
pub struct WorkflowDriver<S, T> {
    surface: S,
    transform: T,
    load_timeout_secs: u64,
    progress_reporter: Option<ProgressReporter>,
}

impl<S: RenderSurface, T: PageTransform> WorkflowDriver<S, T> {
    pub fn new(surface: S, transform: T) -> Self {
        Self {
            surface,
            transform,
            load_timeout_secs: 30,
            progress_reporter: None,
        }
    }

    pub fn with_load_timeout(mut self, seconds: u64) -> Self {
        self.load_timeout_secs = seconds;
        self
    }

    /// Set a progress reporter callback.
    pub fn set_progress_reporter(&mut self, reporter: ProgressReporter) {
        self.progress_reporter = Some(reporter);
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Convert the current page and commit it.
    ///
    /// Returns the converted page, or `None` when nothing is pending. On error
    /// the page stays at the head of the queue.
    pub async fn advance(
        &mut self,
        session: &mut ConversionSession,
        source: &dyn SourceFetch,
    ) -> Result<Option<String>> {
        let page = match session.current_page() {
            Some(p) => p.to_string(),
            None => return Ok(None),
        };
        let context = session.page_context(&page);

        self.report_progress(session.progress(), &format!("Converting {}", page));
        info!("Running {} on {}", self.transform.name(), page);

        let result = self
            .convert_page(&context, source)
            .await
            .map_err(|e| AccessibleError::Page {
                page: page.clone(),
                source: Box::new(e),
            })?;

        session.commit(&page, result)?;
        Ok(Some(page))
    }

    async fn convert_page(
        &mut self,
        context: &PageContext,
        source: &dyn SourceFetch,
    ) -> Result<PageConversionResult> {
        let document = with_timeout(
            self.load_timeout_secs,
            &format!("loading {}", context.page_path),
            self.surface.load(&context.page_path),
        )
        .await?;
        self.transform.transform(&document, context, source).await
    }

    /// Advance until no pages remain.
    pub async fn run(
        &mut self,
        session: &mut ConversionSession,
        source: &dyn SourceFetch,
        policy: TimeoutPolicy,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        loop {
            match self.advance(session, source).await {
                Ok(Some(_)) => summary.converted += 1,
                Ok(None) => break,
                Err(e) if policy == TimeoutPolicy::Skip && e.is_timeout() => {
                    warn!("{}", e);
                    if let Some(page) = session.skip_current() {
                        summary.skipped.push(page);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.report_progress(1.0, "All pages converted");
        Ok(summary)
    }

    fn report_progress(&self, fraction: f64, message: &str) {
        if let Some(ref reporter) = self.progress_reporter {
            reporter(fraction, message);
        }
    }
}
