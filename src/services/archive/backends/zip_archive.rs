use crate::services::archive::backend::ArchiveBackend;
use crate::services::archive::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::services::fs_utils::path_utils::{is_key_safe, normalize_key};
use crate::types::errors::{ExtractError, ExtractResult};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// ZIP through the `zip` crate: random access, per-entry encryption
/// (ZipCrypto or AES).
pub struct ZipBackend {
    path: PathBuf,
    archive: ZipArchive<BufReader<fs::File>>,
    /// Normalized key to central directory index.
    indices: HashMap<String, usize>,
}

impl ZipBackend {
    pub fn open(path: &Path) -> ExtractResult<Self> {
        let file = fs::File::open(path).map_err(|e| {
            ExtractError::Unsupported(format!("Failed to open {}: {e}", path.display()))
        })?;
        let archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| ExtractError::Unsupported(format!("Invalid or corrupt ZIP: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            indices: HashMap::new(),
        })
    }

    fn index_of(&self, entry: &ArchiveEntry) -> ExtractResult<usize> {
        self.indices
            .get(&entry.key)
            .copied()
            .ok_or_else(|| ExtractError::NotFound(entry.key.clone()))
    }
}

impl ArchiveBackend for ZipBackend {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn label(&self) -> String {
        super::label_for(&self.path)
    }

    fn list(&mut self, _password: Option<&str>) -> ExtractResult<Listing> {
        let mut entries = Vec::with_capacity(self.archive.len());
        let mut indices = HashMap::with_capacity(self.archive.len());
        let mut encrypted = false;

        for i in 0..self.archive.len() {
            // Raw access reads the header only, so encrypted entries list fine
            let file = self
                .archive
                .by_index_raw(i)
                .map_err(|e| ExtractError::List(format!("Failed to read entry {i}: {e}")))?;

            let key = normalize_key(file.name());
            if key.is_empty() {
                continue;
            }
            if !is_key_safe(&key) {
                log::warn!("Skipping unsafe ZIP entry: {}", file.name());
                continue;
            }

            encrypted |= file.encrypted();
            let entry = if file.is_dir() {
                ArchiveEntry::directory(key.clone())
            } else {
                ArchiveEntry::file(key.clone(), file.size()).with_encryption(file.encrypted())
            };
            indices.insert(key, i);
            entries.push(entry);
        }

        self.indices = indices;
        Ok(Listing::new(entries, false, encrypted))
    }

    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>> {
        let index = self.index_of(entry)?;
        let file = match password {
            Some(pw) => self.archive.by_index_decrypt(index, pw.as_bytes()),
            None => self.archive.by_index(index),
        }
        .map_err(|e| classify_zip_error(&entry.key, e))?;

        Ok(Box::new(file))
    }
}

fn classify_zip_error(key: &str, error: ZipError) -> ExtractError {
    if matches!(error, ZipError::InvalidPassword) {
        return ExtractError::IncorrectPassword;
    }
    let msg = error.to_string();
    if msg.to_lowercase().contains("password") {
        return ExtractError::IncorrectPassword;
    }
    match error {
        ZipError::UnsupportedArchive(_) => ExtractError::Unsupported(msg),
        ZipError::FileNotFound => ExtractError::NotFound(key.to_string()),
        _ => ExtractError::read(key, msg),
    }
}
