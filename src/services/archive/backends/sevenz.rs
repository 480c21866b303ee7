use crate::services::archive::backend::{drain_entry, prealloc_hint, ArchiveBackend, EntryVisitor};
use crate::services::archive::password::looks_like_password_failure;
use crate::services::archive::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::services::fs_utils::path_utils::{is_key_safe, normalize_key};
use crate::types::errors::{ExtractError, ExtractResult};
use sevenz_rust::{Password, SevenZReader};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// 7z through `sevenz-rust`.
///
/// The library has no per-entry seek: every read is a pass over the
/// folder stream, stopped as soon as the wanted entry is done. The reader
/// binds the password at open time, so each call reopens the file.
pub struct SevenZBackend {
    path: PathBuf,
}

impl SevenZBackend {
    pub fn new(path: &Path) -> ExtractResult<Self> {
        if !path.is_file() {
            return Err(ExtractError::Unsupported(format!(
                "7z archive not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn open_reader(&self, password: Option<&str>) -> ExtractResult<SevenZReader<fs::File>> {
        let pw = password.map(Password::from).unwrap_or_else(Password::empty);
        SevenZReader::open(&self.path, pw).map_err(|e| classify_sevenz_error(e, password.is_some()))
    }

    /// One pass over the stream restricted to `wanted`; entries outside it
    /// are skipped without reaching `visit`. A key stored more than once is
    /// only visited at its last occurrence, matching the listing.
    fn walk(
        &self,
        wanted: &HashMap<&str, &ArchiveEntry>,
        password: Option<&str>,
        visit: &mut EntryVisitor<'_>,
    ) -> ExtractResult<()> {
        let mut reader = self.open_reader(password)?;
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for file in &reader.archive().files {
            let key = normalize_key(file.name());
            if wanted.contains_key(key.as_str()) {
                *occurrences.entry(key).or_default() += 1;
            }
        }

        let mut failure: Option<ExtractError> = None;
        // The library keeps decoding later folders after a `false` return
        let mut stopped = false;

        let walked = reader.for_each_entries(|sz_entry, data| {
            if stopped {
                return Ok(false);
            }
            let key = normalize_key(sz_entry.name());
            let target = wanted.get(key.as_str()).filter(|_| {
                let left = occurrences.get_mut(&key).map(|n| {
                    *n = n.saturating_sub(1);
                    *n
                });
                left == Some(0)
            });
            let Some(entry) = target else {
                return match drain_entry(&key, data) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        failure = Some(e);
                        stopped = true;
                        Ok(false)
                    }
                };
            };

            let entry: &ArchiveEntry = entry;
            let step = visit(entry, &mut *data).and_then(|step| {
                if step.is_continue() {
                    drain_entry(&entry.key, data)?;
                }
                Ok(step)
            });
            match step {
                Ok(ControlFlow::Continue(())) => Ok(true),
                Ok(ControlFlow::Break(())) => {
                    stopped = true;
                    Ok(false)
                }
                Err(e) => {
                    failure = Some(e);
                    stopped = true;
                    Ok(false)
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        walked.map_err(|e| classify_sevenz_error(e, password.is_some()))
    }
}

impl ArchiveBackend for SevenZBackend {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZ
    }

    fn label(&self) -> String {
        super::label_for(&self.path)
    }

    fn list(&mut self, password: Option<&str>) -> ExtractResult<Listing> {
        let reader = self.open_reader(password)?;
        let archive = reader.archive();

        // A folder holding more than one stream means files share one
        // compressed block
        let streams = archive.files.iter().filter(|f| f.has_stream()).count();
        let is_solid = archive.folders.len() < streams;

        let mut entries = Vec::with_capacity(archive.files.len());
        for file in &archive.files {
            let key = normalize_key(file.name());
            if key.is_empty() {
                continue;
            }
            if !is_key_safe(&key) {
                log::warn!("Skipping unsafe 7z entry: {}", file.name());
                continue;
            }
            if file.is_directory() {
                entries.push(ArchiveEntry::directory(key));
            } else {
                entries.push(ArchiveEntry::file(key, file.size()));
            }
        }

        Ok(Listing::new(entries, is_solid, false))
    }

    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>> {
        let bytes = self.read_entry(entry, password)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn read_entry(&mut self, entry: &ArchiveEntry, password: Option<&str>) -> ExtractResult<Vec<u8>> {
        let wanted = HashMap::from([(entry.key.as_str(), entry)]);
        let mut found: Option<Vec<u8>> = None;

        self.walk(&wanted, password, &mut |e, data| {
            let mut buf = Vec::with_capacity(prealloc_hint(e.size));
            data.read_to_end(&mut buf)
                .map_err(|err| ExtractError::read(&e.key, err))?;
            found = Some(buf);
            Ok(ControlFlow::Break(()))
        })?;

        found.ok_or_else(|| ExtractError::NotFound(entry.key.clone()))
    }

    fn for_each_sequential(
        &mut self,
        listing: &Listing,
        password: Option<&str>,
        visit: &mut EntryVisitor<'_>,
    ) -> ExtractResult<()> {
        let wanted: HashMap<&str, &ArchiveEntry> =
            listing.entries.iter().map(|e| (e.key.as_str(), e)).collect();
        self.walk(&wanted, password, visit)
    }
}

fn classify_sevenz_error(error: sevenz_rust::Error, password_supplied: bool) -> ExtractError {
    let msg = error.to_string();
    if looks_like_password_failure(&msg, password_supplied) {
        return ExtractError::IncorrectPassword;
    }
    let lower = msg.to_lowercase();
    if lower.contains("signature") || lower.contains("unsupported") || lower.contains("version") {
        ExtractError::Unsupported(msg)
    } else {
        ExtractError::List(msg)
    }
}
