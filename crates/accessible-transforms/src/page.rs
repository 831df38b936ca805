//! Image replacement: turn every element matched by the rules into a JPEG
//! `<img>` carrying the element's text as alt text.
//!
//! A page is converted in two phases. First every match is rasterized
//! concurrently against the untouched document, with the pre-conversion CSS
//! applied. Only when all of them succeeded is the document rewritten, so a
//! failure leaves nothing half-converted.

use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use accessible_core::config::AccessibilityConfig;
use accessible_core::error::{AccessibleError, Result};
use accessible_core::model::{ConvertedImage, PageContext, PageConversionResult, ReplacementRule};
use accessible_core::surface::{LiveDocument, PageTransform, SourceFetch};
use accessible_core::timeout::with_timeout;
use accessible_utils::encoding::{decode_source, relabel_as_utf8};
use accessible_utils::href::encode_href;

use crate::alt_text;
use crate::matcher::{self, MatchTriple};
use crate::rasterize::{rasterize, DEFAULT_JPEG_QUALITY};

pub const DEFAULT_RASTERIZE_TIMEOUT_SECS: u64 = 15;

static DOCUMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(?:html|head)\b").unwrap());

/// Everything in `source` before the first `<html` or `<head` tag (XML
/// declaration, doctype, leading comments). Empty when neither tag occurs.
pub fn prologue(source: &str) -> &str {
    match DOCUMENT_START.find(source) {
        Some(m) => &source[..m.start()],
        None => "",
    }
}

pub struct ImageReplacement {
    rules: Vec<ReplacementRule>,
    jpeg_quality: u8,
    rasterize_timeout_secs: u64,
}

impl ImageReplacement {
    pub fn new(rules: Vec<ReplacementRule>) -> Self {
        Self {
            rules,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            rasterize_timeout_secs: DEFAULT_RASTERIZE_TIMEOUT_SECS,
        }
    }

    pub fn from_config(config: &AccessibilityConfig) -> Self {
        Self::new(config.img.clone())
            .with_jpeg_quality(config.render.jpeg_quality)
            .with_rasterize_timeout(config.render.rasterize_timeout_secs)
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Per-element limit; zero disables it.
    pub fn with_rasterize_timeout(mut self, seconds: u64) -> Self {
        self.rasterize_timeout_secs = seconds;
        self
    }

    pub fn rules(&self) -> &[ReplacementRule] {
        &self.rules
    }

    /// Alt text and JPEG for every triple, in order.
    async fn render_all<D: LiveDocument>(
        &self,
        document: &D,
        triples: &[MatchTriple<D::Element>],
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let jobs = triples.iter().enumerate().map(|(i, triple)| async move {
            let index = i + 1;
            let alt_element = triple.alt_source.as_ref().unwrap_or(&triple.target);
            let alt_markup = document.inner_html(alt_element).await?;
            let jpeg = with_timeout(
                self.rasterize_timeout_secs,
                &format!("rasterizing element {} of {}", index, document.location()),
                rasterize(document, &triple.target, index, self.jpeg_quality),
            )
            .await?;
            Ok::<_, AccessibleError>((alt_text::extract(&alt_markup), jpeg))
        });
        try_join_all(jobs).await
    }

    async fn rewrite<D: LiveDocument>(
        &self,
        document: &D,
        context: &PageContext,
        triples: Vec<MatchTriple<D::Element>>,
        rendered: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<ConvertedImage>> {
        let mut images = Vec::with_capacity(triples.len());
        for (i, (triple, (alt, image_bytes))) in triples.into_iter().zip(rendered).enumerate() {
            let source_path = context.image_source_path(i + 1);
            if let Some(alt_source) = &triple.alt_source {
                document.remove(alt_source).await?;
            }
            let img = format!(
                r#"<img alt="{}" class="{}" src="{}" />"#,
                alt,
                alt_text::escape(&triple.class_name),
                alt_text::escape(&encode_href(&source_path))
            );
            document.insert_after(&triple.target, &img).await?;
            document.remove(&triple.target).await?;

            images.push(ConvertedImage {
                alt_text: alt,
                image_bytes,
                class_name: triple.class_name,
                source_path,
            });
        }

        let link = format!(
            r#"<link href="{}" rel="stylesheet" type="text/css"/>"#,
            alt_text::escape(&encode_href(&context.stylesheet_href()))
        );
        document.append_to_head(&link).await?;
        Ok(images)
    }
}

impl PageTransform for ImageReplacement {
    fn name(&self) -> &str {
        "ImageReplacement"
    }

    async fn transform<D: LiveDocument>(
        &self,
        document: &D,
        context: &PageContext,
        source: &dyn SourceFetch,
    ) -> Result<PageConversionResult> {
        let triples = matcher::resolve(document, &self.rules).await?;
        if triples.is_empty() {
            log::debug!("{}: nothing to convert", context.page_path);
            return Ok(PageConversionResult::unchanged());
        }
        log::info!("{}: converting {} element(s)", context.page_path, triples.len());

        let pre_style = if context.pre_css.trim().is_empty() {
            None
        } else {
            Some(document.inject_style(&context.pre_css).await?)
        };
        let rendered = self.render_all(document, &triples).await;
        let removed = match &pre_style {
            Some(style) => document.remove(style).await,
            None => Ok(()),
        };
        let rendered = rendered?;
        removed?;

        let raw = source
            .fetch_raw_bytes(&context.page_path)
            .map_err(|e| match e {
                e @ AccessibleError::SourceFetchFailed { .. } => e,
                other => AccessibleError::SourceFetchFailed {
                    path: context.page_path.clone(),
                    reason: other.to_string(),
                },
            })?;
        let decoded = decode_source(&raw);
        log::debug!("{}: source decoded as {}", context.page_path, decoded.encoding);

        let images = self.rewrite(document, context, triples, rendered).await?;
        let markup = document.serialize().await?;
        let updated_html = format!("{}{}", prologue(&decoded.text), markup.replace("></img>", " />"));
        // Stored as UTF-8 from here on.
        let updated_html = if decoded.is_utf8() {
            updated_html
        } else {
            relabel_as_utf8(&updated_html).into_owned()
        };

        Ok(PageConversionResult {
            updated_html,
            images,
        })
    }
}
