use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessibleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CSS query '{query}': {reason}")]
    InvalidSelector { query: String, reason: String },

    #[error("Rasterization failed for element {index}: {reason}")]
    RasterizationFailed { index: usize, reason: String },

    #[error("Cannot fetch original source of '{path}': {reason}")]
    SourceFetchFailed { path: String, reason: String },

    #[error("{operation} timed out after {seconds} seconds")]
    PageTimeout { operation: String, seconds: u64 },

    #[error("Page '{page}' failed: {source}")]
    Page {
        page: String,
        #[source]
        source: Box<AccessibleError>,
    },

    #[error("Rendering surface error: {0}")]
    Surface(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("EPUB error: {0}")]
    Epub(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("Rejected upload: {0}")]
    Upload(String),

    #[error("{0}")]
    Other(String),
}

/// Stable error classification, used when reporting a failed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    InvalidSelector,
    RasterizationFailed,
    SourceFetchFailed,
    PageTimeout,
    Surface,
    Archive,
    Epub,
    Config,
    Image,
    Upload,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::InvalidSelector => "invalid-selector",
            ErrorKind::RasterizationFailed => "rasterization-failed",
            ErrorKind::SourceFetchFailed => "source-fetch-failed",
            ErrorKind::PageTimeout => "page-timeout",
            ErrorKind::Surface => "surface",
            ErrorKind::Archive => "archive",
            ErrorKind::Epub => "epub",
            ErrorKind::Config => "config",
            ErrorKind::Image => "image",
            ErrorKind::Upload => "upload",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl AccessibleError {
    /// Classify the error. `Page` wrappers report the kind of the wrapped error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessibleError::Io(_) => ErrorKind::Io,
            AccessibleError::InvalidSelector { .. } => ErrorKind::InvalidSelector,
            AccessibleError::RasterizationFailed { .. } => ErrorKind::RasterizationFailed,
            AccessibleError::SourceFetchFailed { .. } => ErrorKind::SourceFetchFailed,
            AccessibleError::PageTimeout { .. } => ErrorKind::PageTimeout,
            AccessibleError::Page { source, .. } => source.kind(),
            AccessibleError::Surface(_) => ErrorKind::Surface,
            AccessibleError::Archive(_) => ErrorKind::Archive,
            AccessibleError::Epub(_) => ErrorKind::Epub,
            AccessibleError::Config(_) => ErrorKind::Config,
            AccessibleError::Image(_) => ErrorKind::Image,
            AccessibleError::Upload(_) => ErrorKind::Upload,
            AccessibleError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::PageTimeout
    }

    /// Name of the page this error was reported for, if any.
    pub fn page(&self) -> Option<&str> {
        match self {
            AccessibleError::Page { page, .. } => Some(page),
            _ => None,
        }
    }

    pub fn invalid_selector(query: impl Into<String>, reason: impl fmt::Display) -> Self {
        AccessibleError::InvalidSelector {
            query: query.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rasterization(index: usize, reason: impl fmt::Display) -> Self {
        AccessibleError::RasterizationFailed {
            index,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AccessibleError>;
