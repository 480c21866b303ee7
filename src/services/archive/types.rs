use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Backend family handling a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Plain folder on disk.
    Directory,
    Zip,
    /// 7z through the `sevenz-rust` library.
    SevenZ,
    /// Anything the external 7-Zip executable can read (rar, solid 7z, ...).
    ExternalTool,
}

impl ArchiveFormat {
    /// Cheap default routing: folders, `.zip`, `.7z`, then the external tool.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.is_dir() {
            return Some(Self::Directory);
        }
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "zip" => Some(Self::Zip),
            "7z" => Some(Self::SevenZ),
            "rar" | "tar" | "gz" | "xz" | "bz2" | "cab" | "iso" => Some(Self::ExternalTool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// A file or directory inside a source, independent of backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Normalized relative path (`/` separators, no trailing slash).
    pub key: String,
    /// Uncompressed size. Zero for directories, may be zero when the backend
    /// could not tell.
    pub size: u64,
    pub kind: EntryKind,
    /// Content needs a password. Only set by backends that can tell per
    /// entry; others leave it `false` and report at listing level.
    #[serde(default)]
    pub encrypted: bool,
}

impl ArchiveEntry {
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            kind: EntryKind::File,
            encrypted: false,
        }
    }

    pub fn directory(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            kind: EntryKind::Directory,
            encrypted: false,
        }
    }

    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Everything one listing call reports.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<ArchiveEntry>,
    /// Sequential-only source. Fixed once listed.
    pub is_solid: bool,
    /// Backend saw encrypted entries while listing.
    pub encrypted: bool,
    index: HashMap<String, usize>,
}

impl Listing {
    /// Builds the key index. A key listed more than once keeps only its last
    /// occurrence, which is what extracting in archive order leaves on disk.
    /// Backends that walk a stream skip the earlier occurrences.
    pub fn new(entries: Vec<ArchiveEntry>, is_solid: bool, encrypted: bool) -> Self {
        let last_seen: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        let entries: Vec<ArchiveEntry> = if last_seen.len() < entries.len() {
            log::warn!(
                "{} duplicate keys in listing, keeping the last occurrence of each",
                entries.len() - last_seen.len()
            );
            entries
                .into_iter()
                .enumerate()
                .filter(|(i, e)| last_seen.get(&e.key) == Some(i))
                .map(|(_, e)| e)
                .collect()
        } else {
            entries
        };

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        Self {
            entries,
            is_solid,
            encrypted,
            index,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArchiveEntry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    pub fn total_size(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }
}

/// One progress tick of a bulk copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyProgress {
    pub current_file: String,
    pub completed: usize,
    pub total: usize,
}

/// Receives copy progress. Plain closures qualify.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &CopyProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&CopyProgress) + Send + Sync,
{
    fn report(&self, progress: &CopyProgress) {
        self(progress)
    }
}

/// Entry left out of a copy after its destination could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub key: String,
    pub destination: PathBuf,
    pub reason: String,
}

/// Outcome of `copy_all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyReport {
    pub files_written: usize,
    pub directories_created: usize,
    pub bytes_written: u64,
    pub skipped: Vec<SkippedEntry>,
}

impl CopyReport {
    pub fn has_warnings(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
