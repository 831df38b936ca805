//! Archive path helpers. Archive paths always use `/` and never start with one.

/// Directory part of an archive path, without trailing slash (`""` at the root).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// File name without directory and without its last extension.
///
/// `OEBPS/text/chapter.one.xhtml` → `chapter.one`
pub fn page_base_name(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Collapse `.` and `..` segments. Leading `..` that would escape the root are dropped.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Resolve an `href` found in `base_entry` to an archive path.
pub fn resolve_href(base_entry: &str, href: &str) -> String {
    let href = href.split(['#', '?']).next().unwrap_or(href);
    if let Some(absolute) = href.strip_prefix('/') {
        return normalize(absolute);
    }
    normalize(&join(parent_dir(base_entry), href))
}

/// Relative reference from directory `from_dir` to archive path `to_path`.
///
/// ```
/// use accessible_core::paths::relative_href;
/// assert_eq!(relative_href("OEBPS/text", "OEBPS/kindle-accessible"), "../kindle-accessible");
/// ```
pub fn relative_href(from_dir: &str, to_path: &str) -> String {
    let from = normalize(from_dir);
    let to = normalize(to_path);
    let from_parts: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = Vec::new();
    for _ in common..from_parts.len() {
        out.push("..");
    }
    out.extend(&to_parts[common..]);

    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}
