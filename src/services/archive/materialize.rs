//! Disk materialization: writes a caller-chosen subset of entries to disk.
//!
//! Random-access sources are copied entry by entry. Solid sources get
//! exactly one sequential pass that streams each wanted entry straight to
//! its destination as it is decoded and stops after the last wanted file.
//!
//! Per-entry failures (a destination that stays locked, an entry a
//! random-access backend cannot open) are skipped with a warning. Stream
//! corruption (`SizeMismatch`, `UnexpectedEnd`) aborts the whole copy.

use super::backend::ArchiveBackend;
use super::diagnostic::{write_partial_archive, DumpItem};
use super::password::refine_password_error;
use super::stream::copy_entry;
use super::types::{ArchiveEntry, CopyProgress, CopyReport, Listing, ProgressSink, SkippedEntry};
use crate::services::config::ExtractSettings;
use crate::services::core::retry::{attempt, Clock};
use crate::services::fs_utils::file_utils::FileOpener;
use crate::services::fs_utils::path_utils::{is_key_safe, key_file_name};
use crate::types::errors::{ExtractError, ExtractResult};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// One entry and where the caller wants it; `None` skips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlanEntry {
    pub entry: ArchiveEntry,
    pub destination: Option<PathBuf>,
}

/// Mapping that mirrors the archive layout under `root`, dropping keys that
/// would escape it.
pub fn mirror_into(root: impl Into<PathBuf>) -> impl FnMut(&ArchiveEntry) -> Option<PathBuf> {
    let root = root.into();
    move |entry| is_key_safe(&entry.key).then(|| root.join(&entry.key))
}

/// Collaborators and policy for one copy run.
pub struct CopyContext<'a> {
    pub settings: &'a ExtractSettings,
    pub opener: &'a dyn FileOpener,
    pub clock: &'a dyn Clock,
    pub progress: Option<&'a dyn ProgressSink>,
    pub cancel: Option<&'a AtomicBool>,
    /// Source label, names the diagnostic dump.
    pub label: &'a str,
}

pub struct Materializer<'a> {
    ctx: CopyContext<'a>,
    report: CopyReport,
    /// Files written so far, in order, for the diagnostic dump.
    completed: Vec<DumpItem>,
    processed: usize,
    total_files: usize,
}

impl<'a> Materializer<'a> {
    pub fn new(ctx: CopyContext<'a>, plan: &[CopyPlanEntry]) -> Self {
        let total_files = plan
            .iter()
            .filter(|p| p.destination.is_some() && p.entry.is_file())
            .count();
        Self {
            ctx,
            report: CopyReport::default(),
            completed: Vec::new(),
            processed: 0,
            total_files,
        }
    }

    pub fn run(
        mut self,
        backend: &mut dyn ArchiveBackend,
        listing: &Listing,
        plan: &[CopyPlanEntry],
        password: Option<&str>,
    ) -> ExtractResult<CopyReport> {
        log::info!(
            "Copying {} of {} entries from {} ({})",
            self.total_files,
            listing.file_count(),
            self.ctx.label,
            if listing.is_solid { "solid" } else { "random access" }
        );

        let result = if listing.is_solid {
            self.run_sequential(backend, listing, plan, password)
        } else {
            self.run_random_access(backend, plan, password)
        };
        result.map_err(|e| refine_password_error(e, password.is_some()))?;

        log::info!(
            "Copied {} files ({} bytes) from {}, {} skipped",
            self.report.files_written,
            self.report.bytes_written,
            self.ctx.label,
            self.report.skipped.len()
        );
        Ok(self.report)
    }

    fn run_random_access(
        &mut self,
        backend: &mut dyn ArchiveBackend,
        plan: &[CopyPlanEntry],
        password: Option<&str>,
    ) -> ExtractResult<()> {
        for item in plan {
            self.check_cancelled()?;
            let Some(dest) = item.destination.as_deref() else {
                continue;
            };
            if item.entry.is_directory() {
                self.create_directory(&item.entry, dest);
                continue;
            }

            let mut reader = match backend.open_entry(&item.entry, password) {
                Ok(r) => r,
                Err(e) if e.is_password_error() => return Err(e),
                Err(e) => {
                    self.skip(&item.entry, dest, e.to_string());
                    continue;
                }
            };
            match self.write_file(&item.entry, dest, &mut reader) {
                Ok(()) => {}
                // Random access: a broken read only costs this entry
                Err(e @ (ExtractError::Read { .. } | ExtractError::Io(_))) => {
                    let e = refine_password_error(e, password.is_some());
                    if e.is_password_error() {
                        return Err(e);
                    }
                    self.skip(&item.entry, dest, e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn run_sequential(
        &mut self,
        backend: &mut dyn ArchiveBackend,
        listing: &Listing,
        plan: &[CopyPlanEntry],
        password: Option<&str>,
    ) -> ExtractResult<()> {
        let mut files: HashMap<&str, &Path> = HashMap::new();
        for item in plan {
            let Some(dest) = item.destination.as_deref() else {
                continue;
            };
            if item.entry.is_directory() {
                // Directories carry no data, no need to wait for the stream
                self.create_directory(&item.entry, dest);
            } else {
                files.insert(item.entry.key.as_str(), dest);
            }
        }

        if files.is_empty() {
            return Ok(());
        }

        backend.for_each_sequential(listing, password, &mut |entry, reader| {
            self.check_cancelled()?;
            // Taken out once written, so a key is never written twice
            let Some(dest) = files.remove(entry.key.as_str()) else {
                return Ok(ControlFlow::Continue(()));
            };

            self.write_file(entry, dest, reader)?;
            if files.is_empty() {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })?;

        if !files.is_empty() {
            log::warn!(
                "{} requested entries never appeared in the stream of {}",
                files.len(),
                self.ctx.label
            );
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        entry: &ArchiveEntry,
        dest: &Path,
        reader: &mut dyn Read,
    ) -> ExtractResult<()> {
        let settings = self.ctx.settings;
        let opener = self.ctx.opener;
        let created = attempt(
            &settings.create_retry,
            self.ctx.clock,
            &format!("Creating {}", dest.display()),
            |_| opener.create(dest),
        );
        let file = match created {
            Ok(f) => f,
            Err(e) => {
                self.skip(entry, dest, format!("cannot create destination: {e}"));
                self.tick(entry);
                return Ok(());
            }
        };

        let mut out = BufWriter::with_capacity(settings.buffer_size, file);
        let copied = copy_entry(
            reader,
            &mut out,
            entry.size,
            &entry.key,
            &settings.stall_retry,
            self.ctx.clock,
            settings.buffer_size,
        )
        .and_then(|n| {
            out.flush()?;
            Ok(n)
        });
        drop(out);

        let written = match copied {
            Ok(n) => n,
            Err(ExtractError::UnexpectedEnd {
                key,
                expected,
                received,
                ..
            }) => {
                let dump_path = self.dump_partial(entry, dest);
                return Err(ExtractError::UnexpectedEnd {
                    key,
                    expected,
                    received,
                    dump_path,
                });
            }
            Err(e) => {
                remove_quietly(dest);
                return Err(e);
            }
        };

        self.verify_size(entry, dest, written)?;

        self.completed.push(DumpItem::new(entry.key.clone(), dest));
        self.report.files_written += 1;
        self.report.bytes_written += written;
        self.tick(entry);
        Ok(())
    }

    fn verify_size(&self, entry: &ArchiveEntry, dest: &Path, written: u64) -> ExtractResult<()> {
        let on_disk = fs::metadata(dest)?.len();
        let actual = if written != entry.size { written } else { on_disk };
        if actual == entry.size {
            return Ok(());
        }

        log::error!(
            "Size mismatch for '{}': expected {}, wrote {}",
            entry.key,
            entry.size,
            actual
        );
        remove_quietly(dest);
        Err(ExtractError::SizeMismatch {
            key: entry.key.clone(),
            expected: entry.size,
            actual,
        })
    }

    /// Zip up what was extracted so far plus the truncated file. Best effort.
    fn dump_partial(&self, entry: &ArchiveEntry, dest: &Path) -> Option<PathBuf> {
        let mut items = self.completed.clone();
        items.push(DumpItem::new(entry.key.clone(), dest));

        match write_partial_archive(&self.ctx.settings.diagnostics_dir, self.ctx.label, &items) {
            Ok(path) => {
                log::error!(
                    "Stream of {} ended early in '{}'; partial data saved to {}",
                    self.ctx.label,
                    entry.key,
                    path.display()
                );
                remove_quietly(dest);
                Some(path)
            }
            Err(e) => {
                log::error!("Could not write diagnostic dump for {}: {e}", self.ctx.label);
                None
            }
        }
    }

    fn create_directory(&mut self, entry: &ArchiveEntry, dest: &Path) {
        match fs::create_dir_all(dest) {
            Ok(()) => self.report.directories_created += 1,
            Err(e) => self.skip(entry, dest, format!("cannot create directory: {e}")),
        }
    }

    fn skip(&mut self, entry: &ArchiveEntry, dest: &Path, reason: String) {
        log::warn!("Skipping '{}' -> {}: {reason}", entry.key, dest.display());
        self.report.skipped.push(SkippedEntry {
            key: entry.key.clone(),
            destination: dest.to_path_buf(),
            reason,
        });
    }

    fn tick(&mut self, entry: &ArchiveEntry) {
        self.processed += 1;
        if let Some(progress) = self.ctx.progress {
            progress.report(&CopyProgress {
                current_file: key_file_name(&entry.key).to_string(),
                completed: self.processed,
                total: self.total_files,
            });
        }
    }

    fn check_cancelled(&self) -> ExtractResult<()> {
        match self.ctx.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ExtractError::Cancelled),
            _ => Ok(()),
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
#[path = "tests/materialize_tests.rs"]
mod tests;
