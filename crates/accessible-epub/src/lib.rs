//! EPUB package access for the page converter.
//!
//! [`EpubPackage`] wraps the in-memory archive with what the OPF says: which
//! pages to convert, where generated assets may go, and how to list them in
//! the manifest when the archive is written back.

pub mod package;

use std::path::{Path, PathBuf};

use accessible_core::error::{AccessibleError, Result};
use accessible_core::paths;
use accessible_core::surface::{ArchiveStore, SourceFetch};
use accessible_utils::archive::{EpubArchive, EPUB_MIMETYPE, MIMETYPE_ENTRY};
use accessible_utils::encoding::decode_source;
use accessible_utils::mime;

use crate::package::{
    new_items, parse_opf, read_container, register_manifest_items, OpfPackage, CONTAINER_PATH,
};

/// Largest EPUB accepted for conversion.
pub const MAX_EPUB_BYTES: usize = 100 * 1024 * 1024;

/// Reject uploads over [`MAX_EPUB_BYTES`].
pub fn check_upload_size(len: usize) -> Result<()> {
    if len > MAX_EPUB_BYTES {
        return Err(AccessibleError::Upload(format!(
            "EPUB is {} bytes, the limit is {} MiB",
            len,
            MAX_EPUB_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct EpubPackage {
    archive: EpubArchive,
    opf: OpfPackage,
    pages: Vec<String>,
    added: Vec<String>,
}

impl EpubPackage {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        check_upload_size(bytes.len())?;
        let archive = EpubArchive::from_bytes(bytes)?;
        Self::from_archive(archive)
    }

    pub fn from_archive(archive: EpubArchive) -> Result<Self> {
        if let Some(mimetype) = archive.get(MIMETYPE_ENTRY) {
            let mimetype = String::from_utf8_lossy(mimetype);
            if mimetype.trim().as_bytes() != EPUB_MIMETYPE {
                return Err(AccessibleError::Upload(format!(
                    "not an EPUB (mimetype is '{}')",
                    mimetype.trim()
                )));
            }
        }

        let container = archive
            .get(CONTAINER_PATH)
            .ok_or_else(|| AccessibleError::Epub(format!("missing {}", CONTAINER_PATH)))?;
        let opf_path = read_container(&decode_source(container).text)?;
        let opf_bytes = archive
            .get(&opf_path)
            .ok_or_else(|| AccessibleError::Epub(format!("package document {} not found", opf_path)))?;
        let opf = parse_opf(&opf_path, &decode_source(opf_bytes).text)?;

        let mut pages: Vec<String> = opf
            .spine_pages()
            .into_iter()
            .filter(|page| {
                let present = archive.has_entry(page);
                if !present {
                    log::warn!("Spine item {} is missing from the archive", page);
                }
                present
            })
            .collect();

        if pages.is_empty() {
            log::warn!("No usable spine pages in {}, falling back to every HTML entry", opf_path);
            pages = archive
                .list_entries()
                .into_iter()
                .filter(|entry| mime::is_page(entry))
                .collect();
            pages.sort();
        }
        if pages.is_empty() {
            return Err(AccessibleError::Epub(
                "EPUB contains no XHTML or HTML pages".to_string(),
            ));
        }

        log::info!("EPUB opened: {} page(s), package {}", pages.len(), opf_path);
        Ok(Self {
            archive,
            opf,
            pages,
            added: Vec::new(),
        })
    }

    /// Archive paths of the pages to convert, in reading order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn opf(&self) -> &OpfPackage {
        &self.opf
    }

    pub fn archive(&self) -> &EpubArchive {
        &self.archive
    }

    /// Entries added since the package was opened.
    pub fn added_entries(&self) -> &[String] {
        &self.added
    }

    /// Archive path for generated assets next to the OPF: `preferred`, or
    /// `preferred-2`, `preferred-3`, ... when that name is taken by an entry
    /// or a directory.
    pub fn choose_asset_dir(&self, preferred: &str) -> String {
        let base = paths::join(self.opf.dir(), preferred);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.archive.has_entry(&candidate) || self.archive.has_dir(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        if candidate != base {
            log::info!("{} is taken, using {}", base, candidate);
        }
        candidate
    }

    pub fn extract_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.archive.extract_to(dir)
    }
}

impl ArchiveStore for EpubPackage {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::open(bytes)
    }

    fn list_entries(&self) -> Vec<String> {
        self.archive.list_entries()
    }

    fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        self.archive.read_entry(path)
    }

    fn add_or_replace_entry(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let is_new = !self.archive.has_entry(path);
        self.archive.add_or_replace_entry(path, bytes)?;
        if is_new {
            self.added.push(path.to_string());
        }
        Ok(())
    }

    /// Archive bytes with every added entry listed in the OPF manifest.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let items = new_items(&self.opf, &self.added);
        if items.is_empty() {
            return self.archive.to_bytes();
        }

        let opf_bytes = self.archive.get(&self.opf.path).ok_or_else(|| {
            AccessibleError::Epub(format!("package document {} not found", self.opf.path))
        })?;
        let updated = register_manifest_items(&decode_source(opf_bytes).text, &items)?;
        log::debug!("Registered {} manifest item(s)", items.len());
        self.archive
            .to_bytes_replacing(&self.opf.path, updated.as_bytes())
    }

    fn contains(&self, path: &str) -> bool {
        self.archive.has_entry(path)
    }
}

impl SourceFetch for EpubPackage {
    fn fetch_raw_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.archive.fetch_raw_bytes(path)
    }
}
