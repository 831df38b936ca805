//! Media types for archive entries.

/// Media type of an archive entry, from its extension.
pub fn media_type(path: &str) -> &'static str {
    let ext = match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => ext.to_ascii_lowercase(),
        _ => return "application/octet-stream",
    };
    match ext.as_str() {
        "xhtml" | "xhtm" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "opf" => "application/oebps-package+xml",
        "ncx" => "application/x-dtbncx+xml",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Whether `path` names an HTML page a browser can render.
pub fn is_page(path: &str) -> bool {
    matches!(
        media_type(path),
        "application/xhtml+xml" | "text/html"
    )
}

/// Already-compressed media; deflating these again only costs time.
pub fn is_precompressed(path: &str) -> bool {
    matches!(
        media_type(path),
        "image/png"
            | "image/jpeg"
            | "image/gif"
            | "image/webp"
            | "image/avif"
            | "font/woff"
            | "font/woff2"
    ) || matches!(
        path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).as_deref(),
        Some("mp3" | "mp4" | "ogg" | "m4a")
    )
}
