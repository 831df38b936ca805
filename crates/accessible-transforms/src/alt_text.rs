//! Alt text: tag-stripped text of an element, escaped for an XML attribute.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*?>").unwrap());

/// Strip all tags from `markup`, decode existing character references, then
/// escape `& < > " '` so the text is escaped exactly once.
pub fn extract(markup: &str) -> String {
    let text = TAG.replace_all(markup, "");
    let text = html_escape::decode_html_entities(&text);
    escape(&text)
}

/// `&` first, then `<`, `>`, `"`, `'`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
