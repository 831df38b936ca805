//! Decoding raw page bytes as stored in the archive.

use std::borrow::Cow;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;

static XML_DECL_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<\?xml\b[^>]*?\bencoding\s*=\s*)(["'])[^"']*(["'])"#).unwrap()
});
static META_CHARSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(<meta\b[^>]*?\bcharset\s*=\s*["']?)[\w:.-]+"#).unwrap());

/// Decoded page text and the label of the encoding that was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSource {
    pub text: String,
    pub encoding: &'static str,
}

impl DecodedSource {
    pub fn is_utf8(&self) -> bool {
        self.encoding == encoding_rs::UTF_8.name()
    }
}

/// Decode page bytes: BOM first, then a declared charset, then UTF-8, then
/// Windows-1252.
pub fn decode_source(bytes: &[u8]) -> DecodedSource {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return DecodedSource {
            text: text.into_owned(),
            encoding: encoding.name(),
        };
    }

    if let Some(encoding) = declared_encoding(bytes) {
        // A UTF-8 declaration on invalid UTF-8 falls through to the Windows-1252 guess.
        if encoding != encoding_rs::UTF_8 {
            let (text, _, _) = encoding.decode(bytes);
            return DecodedSource {
                text: text.into_owned(),
                encoding: encoding.name(),
            };
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => DecodedSource {
            text: s.to_string(),
            encoding: encoding_rs::UTF_8.name(),
        },
        Err(_) => {
            log::debug!("Page is not valid UTF-8, decoding as Windows-1252");
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            DecodedSource {
                text: text.into_owned(),
                encoding: encoding_rs::WINDOWS_1252.name(),
            }
        }
    }
}

/// Encoding named by an XML declaration or a `<meta charset>` near the top.
pub fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    for marker in ["encoding=", "charset="] {
        let Some(start) = head.find(marker) else {
            continue;
        };
        let rest = head[start + marker.len()..].trim_start_matches(['"', '\'']);
        let label: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return Some(encoding);
        }
    }
    None
}

/// Point the XML declaration's `encoding` and every `<meta charset>` in
/// `markup` at UTF-8, for text that is about to be stored as UTF-8.
pub fn relabel_as_utf8(markup: &str) -> Cow<'_, str> {
    let declared = XML_DECL_ENCODING.replace(markup, "${1}${2}UTF-8${3}");
    if !META_CHARSET.is_match(&declared) {
        return declared;
    }
    Cow::Owned(META_CHARSET.replace_all(&declared, "${1}UTF-8").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8() {
        let decoded = decode_source("<p>한국어 ⠓⠑⠇⠇⠕</p>".as_bytes());
        assert_eq!(decoded.text, "<p>한국어 ⠓⠑⠇⠇⠕</p>");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"<?xml version=\"1.0\"?>");
        let decoded = decode_source(&bytes);
        assert_eq!(decoded.text, "<?xml version=\"1.0\"?>");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_decode_utf16le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "<html/>".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode_source(&bytes);
        assert_eq!(decoded.text, "<html/>");
        assert_eq!(decoded.encoding, "UTF-16LE");
    }

    #[test]
    fn test_windows_1252_fallback() {
        let decoded = decode_source(b"<p>caf\xE9</p>");
        assert_eq!(decoded.text, "<p>café</p>");
        assert_eq!(decoded.encoding, "windows-1252");
    }

    #[test]
    fn test_declared_encoding() {
        let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-2\"?><html/>";
        assert_eq!(declared_encoding(xml).map(|e| e.name()), Some("ISO-8859-2"));

        let html = b"<html><head><meta charset=\"shift_jis\"></head></html>";
        assert_eq!(declared_encoding(html).map(|e| e.name()), Some("Shift_JIS"));

        assert!(declared_encoding(b"<html/>").is_none());
    }

    #[test]
    fn test_declared_utf8_on_bad_bytes_falls_back() {
        let decoded = decode_source(b"<?xml version=\"1.0\" encoding=\"utf-8\"?><p>\xE9</p>");
        assert_eq!(decoded.encoding, "windows-1252");
        assert!(decoded.text.ends_with("<p>é</p>"));
    }

    #[test]
    fn test_relabel_as_utf8() {
        let page = "<?xml version='1.0' encoding='ISO-8859-1'?>\n<html><head>\
                    <meta charset=\"iso-8859-1\"/>\
                    <meta http-equiv=\"Content-Type\" content=\"text/html; charset=windows-1252\"/>\
                    </head><body>encoding=latin1</body></html>";
        let relabeled = relabel_as_utf8(page);
        assert!(relabeled.starts_with("<?xml version='1.0' encoding='UTF-8'?>"));
        assert!(relabeled.contains(r#"<meta charset="UTF-8"/>"#));
        assert!(relabeled.contains("text/html; charset=UTF-8"));
        assert!(relabeled.contains("<body>encoding=latin1</body>"));

        assert!(matches!(relabel_as_utf8("<html><body/></html>"), Cow::Borrowed(_)));
    }
}
