//! In-memory EPUB/ZIP archive.
//!
//! Entries keep their original order; replaced entries stay in place and new
//! entries are appended. On write `mimetype` always goes first, stored.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use accessible_core::error::{AccessibleError, Result};
use accessible_core::surface::{ArchiveStore, SourceFetch};

use crate::mime::is_precompressed;

pub const MIMETYPE_ENTRY: &str = "mimetype";
pub const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

#[derive(Debug, Clone, Default)]
pub struct EpubArchive {
    entries: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
}

impl EpubArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.index.get(path).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn has_entry(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Whether any entry lives under directory `dir`.
    pub fn has_dir(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.entries.iter().any(|(p, _)| p.starts_with(&prefix))
    }

    pub fn insert(&mut self, path: &str, bytes: Vec<u8>) {
        match self.index.get(path) {
            Some(&i) => self.entries[i].1 = bytes,
            None => {
                self.index.insert(path.to_string(), self.entries.len());
                self.entries.push((path.to_string(), bytes));
            }
        }
    }

    /// Serialize with the contents of `path` swapped for `bytes`, leaving `self` unchanged.
    pub fn to_bytes_replacing(&self, path: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        self.write_zip(Some((path, bytes)))
    }

    fn write_zip(&self, replacement: Option<(&str, &[u8])>) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let zip_err = |path: &str, e: zip::result::ZipError| {
            AccessibleError::Archive(format!("failed to write {}: {}", path, e))
        };

        let mimetype = self.get(MIMETYPE_ENTRY).unwrap_or(EPUB_MIMETYPE);
        writer
            .start_file(MIMETYPE_ENTRY, stored)
            .map_err(|e| zip_err(MIMETYPE_ENTRY, e))?;
        writer.write_all(mimetype)?;

        for (path, bytes) in &self.entries {
            if path == MIMETYPE_ENTRY {
                continue;
            }
            let bytes = match replacement {
                Some((replaced, new_bytes)) if replaced == path => new_bytes,
                _ => bytes.as_slice(),
            };
            let options = if is_precompressed(path) { stored } else { deflated };
            writer.start_file(path.as_str(), options).map_err(|e| zip_err(path, e))?;
            writer.write_all(bytes)?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| AccessibleError::Archive(format!("failed to finalize archive: {}", e)))?;
        Ok(cursor.into_inner())
    }

    /// Write every entry below `dir`, refusing entries that would land outside it.
    pub fn extract_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.entries.len());
        for (name, bytes) in &self.entries {
            let relative = safe_relative_path(name).ok_or_else(|| {
                AccessibleError::Archive(format!("entry escapes the archive root: {}", name))
            })?;
            let out_path = dir.join(relative);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out_path, bytes)?;
            written.push(out_path);
        }
        log::debug!("Extracted {} entries to {}", written.len(), dir.display());
        Ok(written)
    }
}

/// `name` as a relative path with only normal components.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || name.contains('\\') {
        return None;
    }
    let mut path = PathBuf::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains(':') => return None,
            s => path.push(s),
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

impl ArchiveStore for EpubArchive {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| AccessibleError::Archive(format!("not a ZIP archive: {}", e)))?;
        let mut archive = EpubArchive::new();

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| AccessibleError::Archive(format!("entry {}: {}", i, e)))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut buf)
                .map_err(|e| AccessibleError::Archive(format!("{}: {}", name, e)))?;
            archive.insert(&name, buf);
        }

        log::debug!("Read archive with {} entries", archive.len());
        Ok(archive)
    }

    fn list_entries(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        self.get(path)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AccessibleError::Archive(format!("no such entry: {}", path)))
    }

    fn add_or_replace_entry(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        if safe_relative_path(path).is_none() {
            return Err(AccessibleError::Archive(format!(
                "invalid entry path: {}",
                path
            )));
        }
        self.insert(path, bytes);
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.write_zip(None)
    }

    fn contains(&self, path: &str) -> bool {
        self.has_entry(path)
    }
}

impl SourceFetch for EpubArchive {
    fn fetch_raw_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.get(path)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AccessibleError::SourceFetchFailed {
                path: path.to_string(),
                reason: "not in archive".to_string(),
            })
    }
}
