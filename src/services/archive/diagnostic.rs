//! Partial-archive dumps for streams that ended early.
//!
//! The dump is a ZIP holding every entry finished before the failure plus
//! the truncated bytes of the entry in flight, each under its archive key.
//! It is assembled in a temp file and only then moved to a fresh
//! `<label>_partial.zip` name, so earlier dumps are never overwritten.

use crate::services::fs_utils::file_utils::make_unique_path;
use crate::types::errors::{ExtractError, ExtractResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Extracted entry to include: archive key and where its bytes are on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpItem {
    pub key: String,
    pub path: PathBuf,
}

impl DumpItem {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }
}

pub fn write_partial_archive(dir: &Path, label: &str, items: &[DumpItem]) -> ExtractResult<PathBuf> {
    fs::create_dir_all(dir)?;

    let staging = tempfile::NamedTempFile::new_in(dir)?;
    let mut writer = ZipWriter::new(staging);
    let options = SimpleFileOptions::default();

    for item in items {
        let mut source = match fs::File::open(&item.path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!(
                    "Diagnostic dump: cannot read {} for '{}': {e}",
                    item.path.display(),
                    item.key
                );
                continue;
            }
        };
        writer
            .start_file(item.key.clone(), options)
            .map_err(|e| ExtractError::Internal(format!("Diagnostic dump failed: {e}")))?;
        io::copy(&mut source, &mut writer)?;
    }

    let staging = writer
        .finish()
        .map_err(|e| ExtractError::Internal(format!("Diagnostic dump failed: {e}")))?;

    let mut stem = sanitize_filename::sanitize(label);
    if stem.is_empty() {
        stem = "archive".to_string();
    }
    let target = make_unique_path(&dir.join(format!("{stem}_partial.zip")));
    staging.persist(&target).map_err(|e| ExtractError::Io(e.error))?;

    Ok(target)
}

#[cfg(test)]
#[path = "tests/diagnostic_tests.rs"]
mod tests;
