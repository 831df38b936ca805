//! Accessibility configuration: CSS hooks, replacement rules, render limits.
//!
//! The file format is the one the web tool let users download (JSON with
//! `css`, `img` and `meta` keys); TOML with the same shape is accepted too.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AccessibleError, Result};
use crate::model::ReplacementRule;

/// Only schema version understood by this build.
pub const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_IMAGE_CLASS: &str = "kindle-accessible-image";

const DEFAULT_PRE_CSS: &str = r#"/** @note adjusts text *before* conversion for better image optimization */
.braille,.runes,[lang="ko"] {
	margin: 1rem auto;
	font-size: 1.75rem;
	text-align: center;
}"#;

const DEFAULT_POST_CSS: &str = r#"/** @note Full-width image with one line above and below. */
.kindle-accessible-image {
	margin: 0 auto;
	width: 100%;
}
"#;

const DEFAULT_INFO: &str = "For use with kindle-accessible, an EPUB pre-converter for Kindle.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilityConfig {
    pub css: CssConfig,
    pub img: Vec<ReplacementRule>,
    pub meta: Meta,
    pub render: RenderOptions,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            css: CssConfig::default(),
            img: vec![
                ReplacementRule::new(".braille")
                    .with_alt(".braille+.screen-reader-only")
                    .with_class(DEFAULT_IMAGE_CLASS),
                ReplacementRule::new(".runes")
                    .with_alt(".runes+.screen-reader-only")
                    .with_class(DEFAULT_IMAGE_CLASS),
                ReplacementRule::new("[lang=\"ko\"]")
                    .with_alt("")
                    .with_class(DEFAULT_IMAGE_CLASS),
            ],
            meta: Meta::default(),
            render: RenderOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CssConfig {
    /// Applied to matched elements before rasterization.
    pub pre: String,
    /// Shipped in the shared stylesheet that styles the generated images.
    pub post: String,
}

impl Default for CssConfig {
    fn default() -> Self {
        Self {
            pre: DEFAULT_PRE_CSS.to_string(),
            post: DEFAULT_POST_CSS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub info: String,
    pub version: u32,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            info: DEFAULT_INFO.to_string(),
            version: CONFIG_VERSION,
        }
    }
}

/// Limits for the rendering engine. Not part of the web tool's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    pub page_load_timeout_secs: u64,
    pub rasterize_timeout_secs: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Preferred asset directory name; suffixed when it collides with the archive.
    pub asset_dir_name: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 70,
            page_load_timeout_secs: 30,
            rasterize_timeout_secs: 15,
            viewport_width: 1000,
            viewport_height: 1400,
            asset_dir_name: "kindle-accessible".to_string(),
        }
    }
}

/// On-disk config encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.json` is JSON; anything else is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl AccessibilityConfig {
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(contents)
                .map_err(|e| AccessibleError::Config(format!("invalid JSON: {}", e))),
            ConfigFormat::Toml => toml::from_str(contents)
                .map_err(|e| AccessibleError::Config(format!("invalid TOML: {}", e))),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, ConfigFormat::from_path(path)).map_err(|e| match e {
            AccessibleError::Config(msg) => {
                AccessibleError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AccessibleError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AccessibleError::Config(e.to_string()))
    }

    /// Every problem with this config, empty when it is usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.meta.version != CONFIG_VERSION {
            problems.push(format!(
                "unsupported config version {} (expected {})",
                self.meta.version, CONFIG_VERSION
            ));
        }
        if self.img.is_empty() {
            problems.push("no replacement rules in `img`".to_string());
        }
        for (i, rule) in self.img.iter().enumerate() {
            if let Err(e) = rule.validate() {
                problems.push(format!("img[{}]: {}", i, e));
            }
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            problems.push(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.render.jpeg_quality
            ));
        }
        if self.render.viewport_width == 0 || self.render.viewport_height == 0 {
            problems.push("viewport dimensions must be non-zero".to_string());
        }
        let dir = self.render.asset_dir_name.trim();
        if dir.is_empty() || dir.contains('/') || dir.contains('\\') || dir == ".." {
            problems.push(format!(
                "asset_dir_name must be a plain directory name, got '{}'",
                self.render.asset_dir_name
            ));
        }

        problems
    }

    /// Queries the bundled selector parser cannot read. Not errors: the
    /// rendering engine has the final say when the page is converted.
    pub fn warnings(&self) -> Vec<String> {
        self.img
            .iter()
            .enumerate()
            .flat_map(|(i, rule)| {
                rule.unparsed_queries().into_iter().map(move |(query, reason)| {
                    format!("img[{}]: '{}' may not be supported: {}", i, query, reason)
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AccessibleError::Config(problems.join("; ")))
        }
    }
}
