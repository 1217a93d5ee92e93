use std::cell::RefCell;
use std::io::{Cursor, Read};
use std::rc::Rc;

use bytes::Bytes;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::debug;
use zip::ZipArchive;

use crate::fetch::{FetchError, Fetcher};
use crate::key::{archive_entry_location, normalize_entry_name};

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a readable zip archive: {0}")]
    Open(String),
    #[error("archive contains no KML document")]
    NoRootDocument,
    #[error("entry {0} not found in archive")]
    MissingEntry(String),
    #[error("failed to read entry {entry}: {message}")]
    Read { entry: String, message: String },
}

/// True when `bytes` start with a zip local file header.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_SIGNATURE)
}

/// A KMZ archive: a zip holding a root KML document plus the resources it
/// references. Entries are decompressed on demand.
pub struct KmzArchive {
    location: String,
    entries: Vec<String>,
    root_entry: String,
    zip: RefCell<ZipArchive<Cursor<Bytes>>>,
}

impl KmzArchive {
    pub fn from_bytes(location: impl Into<String>, bytes: Bytes) -> Result<Self, ArchiveError> {
        let mut zip =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::Open(e.to_string()))?;

        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let file = zip
                .by_index(i)
                .map_err(|e| ArchiveError::Open(e.to_string()))?;
            if !file.is_dir() {
                entries.push(normalize_entry_name(file.name()));
            }
        }

        // KMZ convention: a top-level doc.kml wins, otherwise the first KML entry.
        let root_entry = entries
            .iter()
            .find(|e| e.eq_ignore_ascii_case("doc.kml"))
            .or_else(|| {
                entries
                    .iter()
                    .find(|e| e.to_ascii_lowercase().ends_with(".kml"))
            })
            .cloned()
            .ok_or(ArchiveError::NoRootDocument)?;

        Ok(Self {
            location: location.into(),
            entries,
            root_entry,
            zip: RefCell::new(zip),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn root_entry(&self) -> &str {
        &self.root_entry
    }

    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, href: &str) -> bool {
        self.entry_for(href).is_some()
    }

    /// Maps an href (a bare entry name or an `archive!/entry` location) to the
    /// entry it names, if that entry exists in this archive.
    pub fn entry_for(&self, href: &str) -> Option<String> {
        let prefix = format!("{}!/", self.location);
        let candidate = match href.strip_prefix(prefix.as_str()) {
            Some(rest) => normalize_entry_name(rest),
            None => normalize_entry_name(href),
        };
        self.entries.iter().any(|e| *e == candidate).then_some(candidate)
    }

    /// Cache location for an entry of this archive.
    pub fn entry_location(&self, entry: &str) -> String {
        archive_entry_location(&self.location, entry)
    }

    pub fn read_entry(&self, href: &str) -> Result<Bytes, ArchiveError> {
        let name = self
            .entry_for(href)
            .ok_or_else(|| ArchiveError::MissingEntry(href.to_string()))?;

        let mut zip = self.zip.borrow_mut();
        let mut file = zip.by_name(&name).map_err(|e| ArchiveError::Read {
            entry: name.clone(),
            message: e.to_string(),
        })?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf).map_err(|e| ArchiveError::Read {
            entry: name.clone(),
            message: e.to_string(),
        })?;
        debug!(archive = %self.location, entry = %name, bytes = buf.len(), "extracted archive entry");
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for KmzArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmzArchive")
            .field("location", &self.location)
            .field("root_entry", &self.root_entry)
            .field("entries", &self.entries)
            .finish()
    }
}

/// Routes hrefs that name archive entries to the archive and everything else
/// to `fallback`. Archive-local hrefs never reach the fallback.
pub struct ArchiveFetcher {
    archive: Rc<KmzArchive>,
    fallback: Rc<dyn Fetcher>,
}

impl ArchiveFetcher {
    pub fn new(archive: Rc<KmzArchive>, fallback: Rc<dyn Fetcher>) -> Self {
        Self { archive, fallback }
    }

    pub fn archive(&self) -> &Rc<KmzArchive> {
        &self.archive
    }
}

impl Fetcher for ArchiveFetcher {
    fn fetch(&self, location: &str) -> LocalBoxFuture<'static, Result<Bytes, FetchError>> {
        if !self.archive.contains(location) {
            return self.fallback.fetch(location);
        }

        let archive = Rc::clone(&self.archive);
        let location = location.to_string();
        async move {
            archive.read_entry(&location).map_err(|e| FetchError::Archive {
                location: location.clone(),
                message: e.to_string(),
            })
        }
        .boxed_local()
    }
}
