use crate::services::archive::backend::ArchiveBackend;
use crate::services::archive::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::services::fs_utils::path_utils::normalize_key;
use crate::types::errors::{ExtractError, ExtractResult};
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A loose folder treated as an archive. Always random access, never
/// encrypted.
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: &Path) -> ExtractResult<Self> {
        if !root.is_dir() {
            return Err(ExtractError::Unsupported(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn entry_path(&self, entry: &ArchiveEntry) -> PathBuf {
        self.root.join(&entry.key)
    }
}

impl ArchiveBackend for DirectoryBackend {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Directory
    }

    fn label(&self) -> String {
        super::label_for(&self.root)
    }

    fn list(&mut self, _password: Option<&str>) -> ExtractResult<Listing> {
        let mut entries = Vec::new();

        for item in WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let item = match item {
                Ok(i) => i,
                Err(e) => {
                    log::warn!("Skipping unreadable path under {}: {e}", self.root.display());
                    continue;
                }
            };

            let Ok(relative) = item.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = normalize_key(&relative.to_string_lossy());
            if key.is_empty() {
                continue;
            }

            let file_type = item.file_type();
            if file_type.is_dir() {
                entries.push(ArchiveEntry::directory(key));
            } else if file_type.is_file() {
                let size = item.metadata().map(|m| m.len()).unwrap_or_else(|e| {
                    log::warn!("Could not stat {}: {e}", item.path().display());
                    0
                });
                entries.push(ArchiveEntry::file(key, size));
            } else {
                log::debug!("Ignoring special file: {}", item.path().display());
            }
        }

        Ok(Listing::new(entries, false, false))
    }

    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        _password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>> {
        let path = self.entry_path(entry);
        let file = fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractError::NotFound(entry.key.clone()),
            _ => ExtractError::read(&entry.key, e),
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}
