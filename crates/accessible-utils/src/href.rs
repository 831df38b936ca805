//! Archive paths as URL references.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters that cannot appear literally in a relative href path.
const HREF_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// `path` (slash-separated, not yet encoded) as an href.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF_ESCAPES).to_string()
}
