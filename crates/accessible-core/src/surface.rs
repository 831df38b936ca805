//! Collaborator traits: rendering surface, live document, archive store,
//! raw source fetch, and the page transform that ties them together.
//!
//! All async methods are driven from a single task, so the futures are not
//! required to be `Send`.

use crate::error::Result;
use crate::model::{PageContext, PageConversionResult};

/// Progress reporter callback type.
pub type ProgressReporter = Box<dyn Fn(f64, &str) + Send + Sync>;

/// Rendered size of an element in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutBox {
    pub width: f64,
    pub height: f64,
}

/// A document loaded and laid out by a real rendering engine.
///
/// Element handles stay valid until the element is removed or the next page
/// is loaded.
#[allow(async_fn_in_trait)]
pub trait LiveDocument {
    type Element: Clone;

    /// Archive path of the loaded page.
    fn location(&self) -> &str;

    /// Fail with `InvalidSelector` unless the engine accepts `query`.
    /// Nothing is queried or registered.
    async fn validate_query(&self, query: &str) -> Result<()>;

    /// All elements matching `query`, in document order.
    async fn query_all(&self, query: &str) -> Result<Vec<Self::Element>>;

    async fn inner_html(&self, element: &Self::Element) -> Result<String>;

    /// Lowercase tag name.
    async fn tag_name(&self, element: &Self::Element) -> Result<String>;

    /// Every computed style property as `(name, serialized value)`, in engine order.
    async fn computed_style(&self, element: &Self::Element) -> Result<Vec<(String, String)>>;

    async fn layout_box(&self, element: &Self::Element) -> Result<LayoutBox>;

    /// Decode `svg` with the engine and paint it onto a transparent
    /// `width` × `height` canvas, returning PNG bytes.
    async fn rasterize_svg(&self, svg: &str, width: u32, height: u32) -> Result<Vec<u8>>;

    /// Add a `<style>` element with `css` to `<head>`.
    async fn inject_style(&self, css: &str) -> Result<Self::Element>;

    /// Parse `markup` and append it to `<head>`.
    async fn append_to_head(&self, markup: &str) -> Result<()>;

    /// Parse `markup` and insert it immediately after `element`.
    async fn insert_after(&self, element: &Self::Element, markup: &str) -> Result<()>;

    async fn remove(&self, element: &Self::Element) -> Result<()>;

    /// Serialized markup of the document element.
    async fn serialize(&self) -> Result<String>;
}

/// Loads pages into a live document, one at a time.
#[allow(async_fn_in_trait)]
pub trait RenderSurface {
    type Document: LiveDocument;

    /// Load the page at archive path `page_path` and wait until it is fully laid out.
    async fn load(&mut self, page_path: &str) -> Result<Self::Document>;
}

/// Original bytes of a page as stored in the archive, before any rendering.
pub trait SourceFetch {
    fn fetch_raw_bytes(&self, path: &str) -> Result<Vec<u8>>;
}

/// A mutable view of the ebook archive.
pub trait ArchiveStore: Sized {
    fn from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Entry paths in archive order (directories excluded).
    fn list_entries(&self) -> Vec<String>;

    fn read_entry(&self, path: &str) -> Result<Vec<u8>>;

    fn add_or_replace_entry(&mut self, path: &str, bytes: Vec<u8>) -> Result<()>;

    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn contains(&self, path: &str) -> bool {
        self.list_entries().iter().any(|p| p == path)
    }
}

/// Converts the matching content of one loaded page.
#[allow(async_fn_in_trait)]
pub trait PageTransform {
    /// Human-readable name of this transform.
    fn name(&self) -> &str;

    async fn transform<D: LiveDocument>(
        &self,
        document: &D,
        context: &PageContext,
        source: &dyn SourceFetch,
    ) -> Result<PageConversionResult>;
}
