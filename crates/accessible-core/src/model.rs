//! Conversion data model.
//!
//! Every page conversion flows through these types: rules in, a
//! [`PageConversionResult`] out, accumulated by the session.

use base64::Engine;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AccessibleError, Result};

/// File name of the shared stylesheet placed in the asset directory.
pub const STYLESHEET_NAME: &str = "style.css";

// ---------------------------------------------------------------------------
// Replacement rules
// ---------------------------------------------------------------------------

/// One content query (and optional alt query / image class) to convert.
///
/// Rule order matters: it decides processing order, and the k-th `content`
/// match is paired with the k-th `alt` match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    /// Elements to turn into images.
    pub content: String,
    /// Elements supplying alt text. Empty or absent: the content element's own text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Class written onto the generated `<img>`.
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl ReplacementRule {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            alt: None,
            class_name: None,
        }
    }

    pub fn with_alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = Some(alt.into());
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// The alt query, if one is set and non-empty.
    pub fn alt_query(&self) -> Option<&str> {
        self.alt.as_deref().filter(|q| !q.trim().is_empty())
    }

    pub fn class_or_default(&self) -> &str {
        self.class_name.as_deref().unwrap_or("")
    }

    /// Reject rules whose content query is empty. Whether a query is valid
    /// CSS is up to the engine the document is loaded in.
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(AccessibleError::invalid_selector(&self.content, "query is empty"));
        }
        Ok(())
    }

    /// Queries the bundled selector parser cannot read. A browser engine may
    /// still accept them (`:lang()`, `:nth-child(.. of ..)`).
    pub fn unparsed_queries(&self) -> Vec<(&str, String)> {
        std::iter::once(self.content.as_str())
            .chain(self.alt_query())
            .filter(|q| !q.trim().is_empty())
            .filter_map(|q| Selector::parse(q).err().map(|e| (q, format!("{:?}", e))))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Page conversion
// ---------------------------------------------------------------------------

/// Per-page inputs to the page transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    /// Archive path of the page, e.g. `OEBPS/text/chapter1.xhtml`.
    pub page_path: String,
    /// Asset directory relative to the page's directory, e.g. `../kindle-accessible`.
    pub asset_dir: String,
    /// Page file name without directory or extension.
    pub page_base_name: String,
    /// CSS applied while rasterizing; removed again before serialization.
    pub pre_css: String,
}

impl PageContext {
    /// `src` of the `index`-th (1-based) image generated on this page.
    pub fn image_source_path(&self, index: usize) -> String {
        image_source_path(&self.asset_dir, &self.page_base_name, index)
    }

    /// `href` of the shared stylesheet, relative to this page.
    pub fn stylesheet_href(&self) -> String {
        join_href(&self.asset_dir, STYLESHEET_NAME)
    }
}

/// `{asset_dir}/img-{page_base_name}-{index}.jpg`
pub fn image_source_path(asset_dir: &str, page_base_name: &str, index: usize) -> String {
    join_href(
        asset_dir,
        &format!("img-{}-{}.jpg", page_base_name, index),
    )
}

/// Recover the page base name from a generated image path.
///
/// `../kindle-accessible/img-chapter-one-3.jpg` → `chapter-one`
pub fn page_name_from_source(source_path: &str) -> String {
    let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
    let parts: Vec<&str> = file_name.split('-').collect();
    if parts.len() < 3 {
        return String::new();
    }
    parts[1..parts.len() - 1].join("-")
}

fn join_href(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// One element converted into an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedImage {
    /// Tag-stripped, XML-escaped alt text.
    pub alt_text: String,
    /// JPEG bytes.
    pub image_bytes: Vec<u8>,
    pub class_name: String,
    /// Page-relative path of the image, not percent-encoded; the `src` written
    /// into the page is its encoded form.
    pub source_path: String,
}

impl ConvertedImage {
    /// `img-{page}-{i}.jpg`
    pub fn file_name(&self) -> &str {
        self.source_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.source_path)
    }

    pub fn page_name(&self) -> String {
        page_name_from_source(&self.source_path)
    }

    /// A `data:` URL for previewing the image without writing it anywhere.
    pub fn preview_url(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.image_bytes)
        )
    }
}

/// Outcome of converting one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageConversionResult {
    /// Rewritten page; empty when nothing matched (the page must not be written).
    pub updated_html: String,
    /// Images in resolved order.
    pub images: Vec<ConvertedImage>,
}

impl PageConversionResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn is_unchanged(&self) -> bool {
        self.updated_html.is_empty()
    }
}

/// Everything the session hands to the archive in one batch.
#[derive(Debug, Clone, Default)]
pub struct PackageBatch {
    /// `(archive path, bytes)` in write order: stylesheet, pages, images.
    pub files: Vec<(String, Vec<u8>)>,
}

impl PackageBatch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(path, _)| path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_source_path() {
        assert_eq!(
            image_source_path("../kindle-accessible", "chapter1", 1),
            "../kindle-accessible/img-chapter1-1.jpg"
        );
        assert_eq!(
            image_source_path("../kindle-accessible/", "chapter1", 12),
            "../kindle-accessible/img-chapter1-12.jpg"
        );
        assert_eq!(image_source_path("", "ch", 2), "img-ch-2.jpg");
    }

    #[test]
    fn test_page_name_from_source() {
        assert_eq!(
            page_name_from_source("../kindle-accessible/img-chapter-one-3.jpg"),
            "chapter-one"
        );
        assert_eq!(page_name_from_source("img-ch1-1.jpg"), "ch1");
        assert_eq!(page_name_from_source("cover.jpg"), "");
    }

    #[test]
    fn test_page_context_paths() {
        let ctx = PageContext {
            page_path: "OEBPS/text/chapter1.xhtml".to_string(),
            asset_dir: "../kindle-accessible".to_string(),
            page_base_name: "chapter1".to_string(),
            pre_css: String::new(),
        };
        assert_eq!(
            ctx.image_source_path(2),
            "../kindle-accessible/img-chapter1-2.jpg"
        );
        assert_eq!(ctx.stylesheet_href(), "../kindle-accessible/style.css");
    }

    #[test]
    fn test_rule_serde_uses_class_key() {
        let rule: ReplacementRule =
            serde_json::from_str(r#"{"content": ".braille", "class": "k"}"#).unwrap();
        assert_eq!(rule.content, ".braille");
        assert_eq!(rule.alt, None);
        assert_eq!(rule.class_name.as_deref(), Some("k"));

        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains(r#""class":"k""#));
        assert!(!json.contains("alt"));
    }

    #[test]
    fn test_empty_alt_is_no_alt() {
        let rule = ReplacementRule::new("[lang=\"ko\"]").with_alt("  ");
        assert_eq!(rule.alt_query(), None);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_only_empty_content_is_rejected() {
        assert!(ReplacementRule::new(":lang(ko)").validate().is_ok());
        assert!(ReplacementRule::new("p:nth-child(2 of .x)").validate().is_ok());

        match ReplacementRule::new(" ").validate() {
            Err(AccessibleError::InvalidSelector { query, .. }) => assert_eq!(query, " "),
            other => panic!("expected InvalidSelector, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsed_queries() {
        let rule = ReplacementRule::new(".braille").with_alt(".braille+.screen-reader-only");
        assert!(rule.unparsed_queries().is_empty());

        let rule = ReplacementRule::new(":lang(ko)").with_alt("p[[");
        let queries: Vec<&str> = rule.unparsed_queries().into_iter().map(|(q, _)| q).collect();
        assert_eq!(queries, vec![":lang(ko)", "p[["]);
    }

    #[test]
    fn test_preview_url() {
        let image = ConvertedImage {
            alt_text: "x".to_string(),
            image_bytes: vec![0xFF, 0xD8, 0xFF],
            class_name: String::new(),
            source_path: "../a/img-p-1.jpg".to_string(),
        };
        assert_eq!(image.preview_url(), "data:image/jpeg;base64,/9j/");
        assert_eq!(image.file_name(), "img-p-1.jpg");
        assert_eq!(image.page_name(), "p");
    }
}
