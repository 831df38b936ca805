//! Page-side scripts.
//!
//! Element handles are indices into an array kept on `window`; it disappears
//! with the document, so handles never outlive the page they came from.

use base64::Engine;

use accessible_core::error::{AccessibleError, Result};

const REGISTRY: &str = "window.__kindleAccessible";
const PNG_DATA_URL: &str = "data:image/png;base64,";

/// `value` as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn registry() -> String {
    format!("const r = ({REGISTRY} = {REGISTRY} || []);")
}

fn with_element(handle: u32, body: &str) -> String {
    format!(
        "(() => {{ const el = ({REGISTRY} || [])[{handle}]; \
         if (!el) throw new Error('stale element {handle}'); {body} }})()"
    )
}

pub fn query_all(query: &str) -> String {
    format!(
        "(() => {{ {} return Array.from(document.querySelectorAll({}), el => r.push(el) - 1); }})()",
        registry(),
        js_string(query)
    )
}

/// `null` when the engine accepts `query`, else the engine's error message.
pub fn validate_query(query: &str) -> String {
    format!(
        "(() => {{ try {{ document.createDocumentFragment().querySelector({}); return null; }} \
         catch (e) {{ return String((e && e.message) || e); }} }})()",
        js_string(query)
    )
}

pub fn inner_html(handle: u32) -> String {
    with_element(handle, "return el.innerHTML;")
}

pub fn tag_name(handle: u32) -> String {
    with_element(handle, "return el.localName.toLowerCase();")
}

pub fn computed_style(handle: u32) -> String {
    with_element(
        handle,
        "const s = getComputedStyle(el); return Array.from(s, p => [p, s.getPropertyValue(p)]);",
    )
}

pub fn layout_box(handle: u32) -> String {
    with_element(
        handle,
        "const b = el.getBoundingClientRect(); return { width: b.width, height: b.height };",
    )
}

pub fn insert_after(handle: u32, markup: &str) -> String {
    with_element(
        handle,
        &format!("el.insertAdjacentHTML('afterend', {}); return true;", js_string(markup)),
    )
}

pub fn remove(handle: u32) -> String {
    with_element(handle, "el.remove(); return true;")
}

pub fn inject_style(css: &str) -> String {
    format!(
        "(() => {{ {} const s = document.createElement('style'); s.textContent = {}; \
         (document.head || document.documentElement).appendChild(s); return r.push(s) - 1; }})()",
        registry(),
        js_string(css)
    )
}

pub fn append_to_head(markup: &str) -> String {
    format!(
        "(() => {{ (document.head || document.documentElement).insertAdjacentHTML('beforeend', {}); return true; }})()",
        js_string(markup)
    )
}

pub const SERIALIZE: &str = "document.documentElement.outerHTML";

/// Resolves once the document has loaded and its fonts are ready.
pub const READY: &str = "new Promise(resolve => { \
    const done = () => document.fonts.ready.then(() => resolve(true)); \
    if (document.readyState === 'complete') done(); \
    else window.addEventListener('load', done, { once: true }); })";

/// Paint `svg` on a transparent canvas and resolve with a PNG data URL.
pub fn rasterize_svg(svg: &str, width: u32, height: u32) -> String {
    format!(
        "new Promise((resolve, reject) => {{ \
         const img = new Image(); \
         img.onload = () => {{ \
           const c = document.createElement('canvas'); c.width = {width}; c.height = {height}; \
           c.getContext('2d').drawImage(img, 0, 0, {width}, {height}); resolve(c.toDataURL('image/png')); }}; \
         img.onerror = () => reject(new Error('SVG image failed to load')); \
         img.src = 'data:image/svg+xml;charset=utf-8,' + encodeURIComponent({}); }})",
        js_string(svg)
    )
}

/// Bytes of a `data:image/png;base64,` URL.
pub fn decode_png_data_url(url: &str) -> Result<Vec<u8>> {
    let payload = url.strip_prefix(PNG_DATA_URL).ok_or_else(|| {
        let head: String = url.chars().take(32).collect();
        AccessibleError::Surface(format!("canvas did not return a PNG data URL: {}", head))
    })?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AccessibleError::Surface(format!("bad PNG data URL: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("a \"q\"\n</script>"), "\"a \\\"q\\\"\\n</script>\"");
    }

    #[test]
    fn test_query_registers_elements() {
        let js = query_all("[lang=\"ko\"]");
        assert!(js.contains("window.__kindleAccessible = window.__kindleAccessible || []"));
        assert!(js.contains("document.querySelectorAll(\"[lang=\\\"ko\\\"]\")"));
        assert!(js.contains("r.push(el) - 1"));
    }

    #[test]
    fn test_validate_query_does_not_register() {
        let js = validate_query(":lang(ko)");
        assert!(js.contains("querySelector(\":lang(ko)\")"));
        assert!(js.contains("return null;"));
        assert!(!js.contains("__kindleAccessible"));
    }

    #[test]
    fn test_element_scripts_check_handle() {
        let js = inner_html(7);
        assert!(js.contains("[7]"));
        assert!(js.contains("stale element 7"));
        assert!(js.ends_with("})()"));
    }

    #[test]
    fn test_markup_is_quoted() {
        let js = insert_after(2, r#"<img alt="x" src="a.jpg" />"#);
        assert!(js.contains(r#"insertAdjacentHTML('afterend', "<img alt=\"x\" src=\"a.jpg\" />")"#));
    }

    #[test]
    fn test_rasterize_script_sizes_canvas() {
        let js = rasterize_svg("<svg/>", 120, 40);
        assert!(js.contains("c.width = 120; c.height = 40;"));
        assert!(js.contains("drawImage(img, 0, 0, 120, 40)"));
        assert!(js.contains("encodeURIComponent(\"<svg/>\")"));
    }

    #[test]
    fn test_decode_png_data_url() {
        assert_eq!(
            decode_png_data_url("data:image/png;base64,iVBORw==").unwrap(),
            vec![0x89, 0x50, 0x4E, 0x47]
        );
        assert!(decode_png_data_url("data:,").is_err());
        assert!(decode_png_data_url("data:image/png;base64,***").is_err());
    }
}
