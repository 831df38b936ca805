//! Container and OPF handling: where the pages are, and how new files get
//! listed in the manifest.

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use accessible_core::error::{AccessibleError, Result};
use accessible_core::paths;
use accessible_utils::href::encode_href;
use accessible_utils::mime;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Decoded href as written in the OPF.
    pub href: String,
    pub media_type: String,
    /// Archive path the href resolves to.
    pub path: String,
}

/// The parts of the package document this tool needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpfPackage {
    pub path: String,
    pub manifest: Vec<ManifestItem>,
    /// `idref`s in reading order.
    pub spine: Vec<String>,
}

impl OpfPackage {
    pub fn dir(&self) -> &str {
        paths::parent_dir(&self.path)
    }

    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Archive paths of renderable spine items, in reading order, without duplicates.
    pub fn spine_pages(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.spine
            .iter()
            .filter_map(|idref| self.item(idref))
            .filter(|item| is_page_media_type(&item.media_type) || mime::is_page(&item.path))
            .filter(|item| seen.insert(item.path.clone()))
            .map(|item| item.path.clone())
            .collect()
    }
}

fn is_page_media_type(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .map(|attr| {
            attr.unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string())
        })
}

/// Path of the first rootfile named by `META-INF/container.xml`.
pub fn read_container(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                if local_name(e) == "rootfile" {
                    if let Some(path) = attribute(e, "full-path").filter(|p| !p.is_empty()) {
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AccessibleError::Epub(format!(
                    "XML error in container.xml: {}",
                    e
                )))
            }
            _ => {}
        }
    }
    Err(AccessibleError::Epub(
        "No rootfile found in container.xml".to_string(),
    ))
}

/// Read manifest and spine from the package document at archive path `opf_path`.
pub fn parse_opf(opf_path: &str, xml: &str) -> Result<OpfPackage> {
    let mut package = OpfPackage {
        path: opf_path.to_string(),
        ..Default::default()
    };
    let mut reader = Reader::from_str(xml);
    let mut in_manifest = false;
    let mut in_spine = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match local_name(e).as_str() {
                "manifest" => in_manifest = true,
                "spine" => in_spine = true,
                "item" if in_manifest => {
                    let id = attribute(e, "id").unwrap_or_default();
                    let href = attribute(e, "href").unwrap_or_default();
                    if id.is_empty() || href.is_empty() {
                        log::debug!("Ignoring manifest item without id or href");
                        continue;
                    }
                    let href = percent_decode_str(&href).decode_utf8_lossy().to_string();
                    package.manifest.push(ManifestItem {
                        path: paths::resolve_href(opf_path, &href),
                        id,
                        href,
                        media_type: attribute(e, "media-type").unwrap_or_default(),
                    });
                }
                "itemref" if in_spine => {
                    if let Some(idref) = attribute(e, "idref") {
                        package.spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"manifest" => in_manifest = false,
                b"spine" => in_spine = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AccessibleError::Epub(format!(
                    "XML error in {}: {}",
                    opf_path, e
                )))
            }
            _ => {}
        }
    }

    log::debug!(
        "{}: {} manifest items, {} spine items",
        opf_path,
        package.manifest.len(),
        package.spine.len()
    );
    Ok(package)
}

/// An archive entry to be listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// Manifest entries for newly added archive paths, with ids unique against `package`.
pub fn new_items(package: &OpfPackage, added: &[String]) -> Vec<NewItem> {
    let listed: HashSet<&str> = package.manifest.iter().map(|i| i.path.as_str()).collect();
    let mut ids: HashSet<String> = package.manifest.iter().map(|i| i.id.clone()).collect();

    added
        .iter()
        .filter(|path| !listed.contains(path.as_str()))
        .filter(|path| path.as_str() != package.path.as_str())
        .map(|path| {
            let base = format!("kindle-accessible-{}", id_safe(paths::file_name(path)));
            let mut id = base.clone();
            let mut n = 2;
            while ids.contains(&id) {
                id = format!("{}-{}", base, n);
                n += 1;
            }
            ids.insert(id.clone());
            NewItem {
                id,
                href: encode_href(&paths::relative_href(package.dir(), path)),
                media_type: mime::media_type(path).to_string(),
            }
        })
        .collect()
}

fn id_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Insert `<item>` elements for `items` just before the closing manifest tag.
///
/// The rest of the document is left byte-for-byte intact.
pub fn register_manifest_items(opf_xml: &str, items: &[NewItem]) -> Result<String> {
    if items.is_empty() {
        return Ok(opf_xml.to_string());
    }

    let mut reader = Reader::from_str(opf_xml);
    let mut close: Option<(usize, String)> = None;
    loop {
        match reader.read_event() {
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"manifest" => {
                let end = reader.buffer_position() as usize;
                let start = opf_xml[..end].rfind("</").ok_or_else(|| {
                    AccessibleError::Epub("malformed manifest end tag".to_string())
                })?;
                let qname = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let prefix = qname
                    .split_once(':')
                    .map(|(p, _)| format!("{}:", p))
                    .unwrap_or_default();
                close = Some((start, prefix));
                break;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AccessibleError::Epub(format!("XML error in OPF: {}", e))),
            _ => {}
        }
    }

    let (insert_at, prefix) =
        close.ok_or_else(|| AccessibleError::Epub("OPF has no <manifest> element".to_string()))?;

    let mut markup = String::new();
    for item in items {
        markup.push_str(&format!(
            "  <{}item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            prefix,
            escape(item.id.as_str()),
            escape(item.href.as_str()),
            escape(item.media_type.as_str()),
        ));
    }

    let mut out = String::with_capacity(opf_xml.len() + markup.len());
    out.push_str(&opf_xml[..insert_at]);
    out.push_str(&markup);
    out.push_str(&opf_xml[insert_at..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>T</dc:title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch1" href="text/chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="styles/main.css" media-type="text/css"/>
    <item id="cover" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="ch2"/>
    <itemref idref="ch1"/>
    <itemref idref="css"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    #[test]
    fn test_read_container() {
        assert_eq!(read_container(CONTAINER).unwrap(), "OEBPS/content.opf");
        let err = read_container("<container><rootfiles/></container>").unwrap_err();
        assert!(err.to_string().contains("No rootfile"));
    }

    #[test]
    fn test_parse_opf() {
        let package = parse_opf("OEBPS/content.opf", OPF).unwrap();
        assert_eq!(package.manifest.len(), 5);
        assert_eq!(package.dir(), "OEBPS");

        let ch1 = package.item("ch1").unwrap();
        assert_eq!(ch1.href, "text/chapter 1.xhtml");
        assert_eq!(ch1.path, "OEBPS/text/chapter 1.xhtml");
        assert_eq!(package.spine, vec!["ch2", "ch1", "css", "ch2"]);
    }

    #[test]
    fn test_spine_pages_in_reading_order() {
        let package = parse_opf("OEBPS/content.opf", OPF).unwrap();
        assert_eq!(
            package.spine_pages(),
            vec!["OEBPS/text/ch2.xhtml", "OEBPS/text/chapter 1.xhtml"]
        );
    }

    #[test]
    fn test_new_items_unique_ids() {
        let mut package = parse_opf("OEBPS/content.opf", OPF).unwrap();
        package.manifest.push(ManifestItem {
            id: "kindle-accessible-style.css".to_string(),
            href: "x.css".to_string(),
            media_type: "text/css".to_string(),
            path: "OEBPS/x.css".to_string(),
        });
        let added = vec![
            "OEBPS/kindle-accessible/style.css".to_string(),
            "OEBPS/kindle-accessible/img-chapter 1-1.jpg".to_string(),
            // Already listed
            "OEBPS/text/ch2.xhtml".to_string(),
        ];
        let items = new_items(&package, &added);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "kindle-accessible-style.css-2");
        assert_eq!(items[0].href, "kindle-accessible/style.css");
        assert_eq!(items[0].media_type, "text/css");
        assert_eq!(items[1].id, "kindle-accessible-img-chapter_1-1.jpg");
        assert_eq!(items[1].href, "kindle-accessible/img-chapter%201-1.jpg");
        assert_eq!(items[1].media_type, "image/jpeg");
    }

    #[test]
    fn test_register_manifest_items() {
        let items = vec![NewItem {
            id: "kindle-accessible-img-ch2-1.jpg".to_string(),
            href: "kindle-accessible/img-ch2-1.jpg".to_string(),
            media_type: "image/jpeg".to_string(),
        }];
        let updated = register_manifest_items(OPF, &items).unwrap();

        let manifest_end = updated.find("</manifest>").unwrap();
        let item_pos = updated
            .find(r#"<item id="kindle-accessible-img-ch2-1.jpg" href="kindle-accessible/img-ch2-1.jpg" media-type="image/jpeg"/>"#)
            .unwrap();
        assert!(item_pos < manifest_end);
        assert!(updated.starts_with(&OPF[..OPF.find("</manifest>").unwrap()]));
        assert!(updated.ends_with(&OPF[OPF.find("</manifest>").unwrap()..]));

        let reparsed = parse_opf("OEBPS/content.opf", &updated).unwrap();
        assert_eq!(reparsed.manifest.len(), 6);
        assert_eq!(
            reparsed.manifest[5].path,
            "OEBPS/kindle-accessible/img-ch2-1.jpg"
        );
    }

    #[test]
    fn test_register_keeps_namespace_prefix() {
        let opf = r#"<opf:package xmlns:opf="http://www.idpf.org/2007/opf"><opf:manifest><opf:item id="a" href="a.xhtml" media-type="application/xhtml+xml"/></opf:manifest></opf:package>"#;
        let items = vec![NewItem {
            id: "b".to_string(),
            href: "b.css".to_string(),
            media_type: "text/css".to_string(),
        }];
        let updated = register_manifest_items(opf, &items).unwrap();
        assert!(updated.contains(r#"<opf:item id="b" href="b.css" media-type="text/css"/>"#));
        assert_eq!(parse_opf("content.opf", &updated).unwrap().manifest.len(), 2);
    }

    #[test]
    fn test_register_without_manifest_fails() {
        let items = vec![NewItem {
            id: "b".to_string(),
            href: "b.css".to_string(),
            media_type: "text/css".to_string(),
        }];
        assert!(register_manifest_items("<package/>", &items).is_err());
        assert_eq!(register_manifest_items("<package/>", &[]).unwrap(), "<package/>");
    }
}
