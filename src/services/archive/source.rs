//! `ArchiveSource`: one opened archive or folder and everything cached about it.
//!
//! The source owns the backend, the listing (fetched once), the password
//! state and, for solid archives, the preload cache. Blocking backend work
//! runs on `spawn_blocking`; state locks are never held across an await.

use super::backend::{prealloc_hint, ArchiveBackend};
use super::backends::create_backend;
use super::materialize::{CopyContext, CopyPlanEntry, Materializer};
use super::password::{refine_password_error, verify_password, PasswordState};
use super::preload::{Lookup, PreloadState};
use super::stream::copy_entry;
use super::types::{ArchiveEntry, ArchiveFormat, CopyReport, Listing, ProgressSink};
use crate::services::config::ExtractSettings;
use crate::services::core::pass_lock::PassLock;
use crate::services::core::retry::{Clock, SystemClock};
use crate::services::fs_utils::file_utils::{DiskOpener, FileOpener};
use crate::types::errors::{ExtractError, ExtractResult};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SourceState {
    password: PasswordState,
    listing: Option<Arc<Listing>>,
    preload: PreloadState,
}

pub struct ArchiveSource {
    format: ArchiveFormat,
    label: String,
    backend: Arc<Mutex<Box<dyn ArchiveBackend>>>,
    state: Arc<Mutex<SourceState>>,
    pass_lock: PassLock,
    settings: Arc<ExtractSettings>,
    opener: Arc<dyn FileOpener>,
    clock: Arc<dyn Clock>,
}

impl ArchiveSource {
    /// Open `path` with the given backend and negotiate its password state.
    ///
    /// An encrypted source still opens; check [`Self::password_state`] and
    /// call [`Self::try_set_password`] before reading.
    pub async fn open(
        path: &Path,
        format: ArchiveFormat,
        settings: Arc<ExtractSettings>,
    ) -> ExtractResult<Self> {
        let owned = path.to_path_buf();
        let backend_settings = settings.clone();
        let backend = tokio::task::spawn_blocking(move || {
            create_backend(&owned, format, &backend_settings)
        })
        .await??;

        Self::from_backend(backend, settings).await
    }

    /// [`Self::open`] with the format guessed from the path.
    pub async fn open_path(path: &Path, settings: Arc<ExtractSettings>) -> ExtractResult<Self> {
        let format = ArchiveFormat::from_path(path).ok_or_else(|| {
            ExtractError::Unsupported(format!("Unknown archive type: {}", path.display()))
        })?;
        Self::open(path, format, settings).await
    }

    /// Wrap an already constructed backend.
    pub async fn from_backend(
        backend: Box<dyn ArchiveBackend>,
        settings: Arc<ExtractSettings>,
    ) -> ExtractResult<Self> {
        let source = Self {
            format: backend.format(),
            label: backend.label(),
            backend: Arc::new(Mutex::new(backend)),
            state: Arc::new(Mutex::new(SourceState::default())),
            pass_lock: PassLock::new(),
            settings,
            opener: Arc::new(DiskOpener),
            clock: Arc::new(SystemClock),
        };
        source.negotiate().await?;
        Ok(source)
    }

    /// Destination file creation goes through `opener`.
    pub fn with_file_opener(mut self, opener: Arc<dyn FileOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Retry delays go through `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn password_state(&self) -> ExtractResult<PasswordState> {
        Ok(self.lock_state()?.password.clone())
    }

    /// Cached listing. Fails with `IncorrectPassword` until the source is
    /// unlocked.
    pub fn list_entries(&self) -> ExtractResult<Arc<Listing>> {
        let state = self.lock_state()?;
        Self::usable_listing(&state)
    }

    /// Solid flag from the listing; `false` while the listing is unknown.
    pub fn is_solid(&self) -> bool {
        self.lock_state()
            .ok()
            .and_then(|s| s.listing.as_ref().map(|l| l.is_solid))
            .unwrap_or(false)
    }

    /// Number of solid entries already held in memory.
    pub fn cached_entries(&self) -> usize {
        self.lock_state()
            .map(|s| s.preload.cached_len())
            .unwrap_or(0)
    }

    /// Replace the password and re-run the probe decode. The listing is only
    /// fetched again when the first attempt could not list at all.
    pub async fn try_set_password(&self, password: &str) -> ExtractResult<()> {
        let needs_listing = {
            let mut state = self.lock_state()?;
            state.password.set_password(password);
            state.listing.is_none()
        };

        if needs_listing {
            let pw = password.to_string();
            match self.with_backend(move |b| b.list(Some(&pw))).await {
                Ok(listing) => self.store_listing(listing)?,
                Err(ExtractError::IncorrectPassword) => {
                    self.lock_state()?.password.record_locked_listing();
                    log::info!("Password rejected for {}", self.label);
                    return Err(ExtractError::IncorrectPassword);
                }
                Err(e) => return Err(e),
            }
        }

        if self.verify_current_password().await? {
            Ok(())
        } else {
            Err(ExtractError::IncorrectPassword)
        }
    }

    /// Whether `key` can be read right now.
    ///
    /// Random-access sources answer from the listing. Solid sources answer
    /// from the preload cache and queue the key for the next
    /// [`Self::resolve_pending`]; nothing is decoded here.
    pub fn is_available(&self, key: &str) -> bool {
        let mut state = match self.lock_state() {
            Ok(s) => s,
            Err(e) => {
                log::error!("{}: {e}", self.label);
                return false;
            }
        };
        let Ok(listing) = Self::usable_listing(&state) else {
            return false;
        };
        if !listing.get(key).is_some_and(|e| e.is_file()) {
            return false;
        }
        if !listing.is_solid {
            return true;
        }

        match state.preload.lookup(key) {
            Some(Lookup::Cached(_)) => true,
            Some(Lookup::Missing) => false,
            _ => {
                state.preload.request(key);
                false
            }
        }
    }

    /// Bytes of the file `key`.
    ///
    /// On a solid source an uncached key is queued and reported as
    /// `NotYetResolved`; call [`Self::resolve_pending`] and read again.
    pub async fn read(&self, key: &str) -> ExtractResult<Arc<[u8]>> {
        let entry = {
            let mut state = self.lock_state()?;
            let listing = Self::usable_listing(&state)?;
            let entry = listing
                .get(key)
                .cloned()
                .ok_or_else(|| ExtractError::NotFound(key.to_string()))?;
            if entry.is_directory() {
                return Err(ExtractError::read(key, "entry is a directory"));
            }

            if listing.is_solid {
                return match state.preload.lookup(key) {
                    Some(Lookup::Cached(bytes)) => Ok(bytes),
                    Some(Lookup::Missing) => Err(ExtractError::NotFound(key.to_string())),
                    _ => {
                        state.preload.request(key);
                        Err(ExtractError::NotYetResolved(key.to_string()))
                    }
                };
            }
            entry
        };

        let password = self.current_password()?;
        let supplied = password.is_some();
        let bytes = self
            .with_backend(move |b| b.read_entry(&entry, password.as_deref()))
            .await
            .map_err(|e| refine_password_error(e, supplied))?;
        Ok(Arc::from(bytes))
    }

    /// Run one sequential pass that decodes every queued key into the cache.
    ///
    /// The pass stops as soon as the last queued key is stored. Keys the
    /// stream never contained are remembered as missing. A caller that had
    /// to wait for a running pass returns without decoding when that pass
    /// already served its keys.
    pub async fn resolve_pending(&self, cancel: Option<Arc<AtomicBool>>) -> ExtractResult<()> {
        if !self.is_solid() {
            return Ok(());
        }
        if self.lock_state()?.preload.pending_len() == 0 {
            return Ok(());
        }

        let _pass = self.pass_lock.acquire().await;

        let (listing, pending) = {
            let state = self.lock_state()?;
            (Self::usable_listing(&state)?, state.preload.pending_keys())
        };
        if pending.is_empty() {
            log::debug!("{}: pending entries already served by an earlier pass", self.label);
            return Ok(());
        }

        log::info!(
            "Preloading {} of {} entries from {}",
            pending.len(),
            listing.file_count(),
            self.label
        );

        let password = self.current_password()?;
        let supplied = password.is_some();
        let state = self.state.clone();
        let settings = self.settings.clone();
        let clock = self.clock.clone();

        let stored = self
            .with_backend(move |backend| {
                let mut remaining = pending;
                let mut stored = 0usize;

                backend.for_each_sequential(&listing, password.as_deref(), &mut |entry, reader| {
                    if is_cancelled(cancel.as_deref()) {
                        return Err(ExtractError::Cancelled);
                    }
                    if !remaining.contains(&entry.key) {
                        return Ok(ControlFlow::Continue(()));
                    }

                    let mut buf = Vec::with_capacity(prealloc_hint(entry.size));
                    copy_entry(
                        reader,
                        &mut buf,
                        entry.size,
                        &entry.key,
                        &settings.stall_retry,
                        clock.as_ref(),
                        settings.buffer_size,
                    )?;
                    if buf.len() as u64 != entry.size {
                        log::warn!(
                            "'{}' decoded to {} bytes, listing said {}",
                            entry.key,
                            buf.len(),
                            entry.size
                        );
                    }

                    remaining.remove(&entry.key);
                    state.lock()?.preload.store(&entry.key, buf);
                    stored += 1;

                    if remaining.is_empty() {
                        Ok(ControlFlow::Break(()))
                    } else {
                        Ok(ControlFlow::Continue(()))
                    }
                })?;

                if !remaining.is_empty() {
                    log::warn!("{} requested entries not found in stream", remaining.len());
                    state.lock()?.preload.mark_missing(remaining);
                }
                Ok(stored)
            })
            .await
            .map_err(|e| refine_password_error(e, supplied))?;

        log::info!(
            "Preloaded {} entries from {} ({} bytes cached)",
            stored,
            self.label,
            self.lock_state()?.preload.cached_bytes()
        );
        Ok(())
    }

    /// Write the entries `mapping` assigns a destination to.
    ///
    /// `mapping` is called exactly once per entry, in listing order, before
    /// anything is extracted; `None` skips the entry.
    pub async fn copy_all<F>(
        &self,
        mut mapping: F,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> ExtractResult<CopyReport>
    where
        F: FnMut(&ArchiveEntry) -> Option<PathBuf> + Send,
    {
        let listing = self.list_entries()?;
        let plan: Vec<CopyPlanEntry> = listing
            .entries
            .iter()
            .map(|entry| CopyPlanEntry {
                entry: entry.clone(),
                destination: mapping(entry),
            })
            .collect();

        let _pass = self.pass_lock.acquire().await;

        let password = self.current_password()?;
        let settings = self.settings.clone();
        let opener = self.opener.clone();
        let clock = self.clock.clone();
        let label = self.label.clone();

        self.with_backend(move |backend| {
            let ctx = CopyContext {
                settings: &settings,
                opener: opener.as_ref(),
                clock: clock.as_ref(),
                progress: progress.as_deref(),
                cancel: cancel.as_deref(),
                label: &label,
            };
            Materializer::new(ctx, &plan).run(backend, &listing, &plan, password.as_deref())
        })
        .await
    }

    async fn negotiate(&self) -> ExtractResult<()> {
        match self.with_backend(|b| b.list(None)).await {
            Ok(listing) => self.store_listing(listing)?,
            Err(ExtractError::IncorrectPassword) => {
                self.lock_state()?.password.record_locked_listing();
                log::info!("{} has an encrypted listing, password required", self.label);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.verify_current_password().await?;
        Ok(())
    }

    /// Probe-decode one entry with the current password and record the
    /// outcome.
    async fn verify_current_password(&self) -> ExtractResult<bool> {
        let _pass = self.pass_lock.acquire().await;

        let (listing, password) = {
            let state = self.lock_state()?;
            let listing = state
                .listing
                .clone()
                .ok_or_else(|| ExtractError::Internal("probe without listing".into()))?;
            (listing, state.password.current_password.clone())
        };

        let probe_listing = listing.clone();
        let decoded = self
            .with_backend(move |b| verify_password(b, &probe_listing, password.as_deref()))
            .await?;

        let mut state = self.lock_state()?;
        state.password.record_probe(&listing, decoded);
        log::info!(
            "Password check on {}: required={}, correct={}",
            self.label,
            state.password.required,
            state.password.correct
        );
        Ok(decoded)
    }

    fn store_listing(&self, listing: Listing) -> ExtractResult<()> {
        log::info!(
            "Opened {} ({:?}): {} entries, {} files ({} bytes), solid={}",
            self.label,
            self.format,
            listing.entries.len(),
            listing.file_count(),
            listing.total_size(),
            listing.is_solid
        );
        self.lock_state()?.listing = Some(Arc::new(listing));
        Ok(())
    }

    fn usable_listing(state: &SourceState) -> ExtractResult<Arc<Listing>> {
        if !state.password.is_usable() {
            return Err(ExtractError::IncorrectPassword);
        }
        state
            .listing
            .clone()
            .ok_or(ExtractError::IncorrectPassword)
    }

    fn current_password(&self) -> ExtractResult<Option<String>> {
        Ok(self.lock_state()?.password.current_password.clone())
    }

    fn lock_state(&self) -> ExtractResult<MutexGuard<'_, SourceState>> {
        Ok(self.state.lock()?)
    }

    /// Run `op` against the backend on a blocking worker.
    async fn with_backend<T, F>(&self, op: F) -> ExtractResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn ArchiveBackend) -> ExtractResult<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = backend.lock()?;
            op(&mut **guard)
        })
        .await?
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
