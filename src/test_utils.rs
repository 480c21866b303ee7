use crate::services::archive::backend::{ArchiveBackend, EntryVisitor};
use crate::services::archive::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::services::core::retry::Clock;
use crate::services::fs_utils::file_utils::{DiskOpener, FileOpener};
use crate::types::errors::{ExtractError, ExtractResult};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use zip::write::SimpleFileOptions;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Write a stored (uncompressed) ZIP holding `files` to `path`.
pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, data) in files {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Clock that records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn sleep(&self, delay: Duration) {
        self.sleeps.lock().unwrap().push(delay);
    }
}

/// Opener whose first `failures` calls fail as if the file were locked.
#[derive(Debug, Default)]
pub struct FlakyOpener {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyOpener {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileOpener for FlakyOpener {
    fn create(&self, path: &Path) -> io::Result<fs::File> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is locked",
            ));
        }
        DiskOpener.create(path)
    }
}

/// Counters shared between a `MemoryBackend` and the test holding it.
#[derive(Debug, Default)]
pub struct MemoryStats {
    list_calls: AtomicUsize,
    passes: AtomicUsize,
    random_reads: AtomicUsize,
    visited: Mutex<Vec<String>>,
    served: Mutex<HashMap<String, u64>>,
}

impl MemoryStats {
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Sequential passes started.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn random_reads(&self) -> usize {
        self.random_reads.load(Ordering::SeqCst)
    }

    /// Keys handed to a visitor by sequential passes, in order.
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }

    /// Bytes of `key` actually read by consumers.
    pub fn served(&self, key: &str) -> u64 {
        self.served.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

struct MemoryEntry {
    entry: ArchiveEntry,
    data: Vec<u8>,
}

/// Scriptable in-memory backend, solid or random access.
pub struct MemoryBackend {
    entries: Vec<MemoryEntry>,
    solid: bool,
    password: Option<String>,
    header_encrypted: bool,
    /// Key to bytes served before the stream goes dry.
    stalls: HashMap<String, usize>,
    stats: Arc<MemoryStats>,
}

impl MemoryBackend {
    pub fn solid<K, D>(files: impl IntoIterator<Item = (K, D)>) -> Self
    where
        K: Into<String>,
        D: Into<Vec<u8>>,
    {
        Self::build(files, true)
    }

    pub fn random_access<K, D>(files: impl IntoIterator<Item = (K, D)>) -> Self
    where
        K: Into<String>,
        D: Into<Vec<u8>>,
    {
        Self::build(files, false)
    }

    fn build<K, D>(files: impl IntoIterator<Item = (K, D)>, solid: bool) -> Self
    where
        K: Into<String>,
        D: Into<Vec<u8>>,
    {
        let entries = files
            .into_iter()
            .map(|(key, data)| {
                let data = data.into();
                MemoryEntry {
                    entry: ArchiveEntry::file(key, data.len() as u64),
                    data,
                }
            })
            .collect();
        Self {
            entries,
            solid,
            password: None,
            header_encrypted: false,
            stalls: HashMap::new(),
            stats: Arc::new(MemoryStats::default()),
        }
    }

    /// Content only decodes with `password`.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Listing also requires the password.
    pub fn header_encrypted(mut self) -> Self {
        self.header_encrypted = true;
        self
    }

    pub fn with_directory(mut self, key: &str) -> Self {
        self.entries.push(MemoryEntry {
            entry: ArchiveEntry::directory(key),
            data: Vec::new(),
        });
        self
    }

    /// `key` yields `bytes` bytes, then only zero-length reads.
    pub fn stall_after(mut self, key: &str, bytes: usize) -> Self {
        self.stalls.insert(key.to_string(), bytes);
        self
    }

    /// List `key` with `size` instead of its real length.
    pub fn declare_size(mut self, key: &str, size: u64) -> Self {
        if let Some(e) = self.entries.iter_mut().find(|e| e.entry.key == key) {
            e.entry.size = size;
        }
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }

    fn check_password(&self, supplied: Option<&str>) -> ExtractResult<()> {
        match &self.password {
            Some(expected) if supplied != Some(expected.as_str()) => {
                Err(ExtractError::IncorrectPassword)
            }
            _ => Ok(()),
        }
    }

    fn reader_for<'a>(&'a self, item: &'a MemoryEntry) -> MemoryReader<'a> {
        let limit = self
            .stalls
            .get(&item.entry.key)
            .copied()
            .unwrap_or(item.data.len());
        MemoryReader {
            key: &item.entry.key,
            data: &item.data[..limit.min(item.data.len())],
            pos: 0,
            stats: &self.stats,
        }
    }
}

struct MemoryReader<'a> {
    key: &'a str,
    data: &'a [u8],
    pos: usize,
    stats: &'a MemoryStats,
}

impl Read for MemoryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        *self
            .stats
            .served
            .lock()
            .unwrap()
            .entry(self.key.to_string())
            .or_default() += n as u64;
        Ok(n)
    }
}

impl ArchiveBackend for MemoryBackend {
    fn format(&self) -> ArchiveFormat {
        if self.solid {
            ArchiveFormat::SevenZ
        } else {
            ArchiveFormat::Zip
        }
    }

    fn label(&self) -> String {
        "memory.bin".to_string()
    }

    fn list(&mut self, password: Option<&str>) -> ExtractResult<Listing> {
        self.stats.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.header_encrypted {
            self.check_password(password)?;
        }
        let entries = self.entries.iter().map(|e| e.entry.clone()).collect();
        Ok(Listing::new(entries, self.solid, self.password.is_some()))
    }

    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>> {
        if self.solid {
            return Err(ExtractError::Unsupported(
                "solid stream has no random access".to_string(),
            ));
        }
        self.stats.random_reads.fetch_add(1, Ordering::SeqCst);
        self.check_password(password)?;

        let this: &'a MemoryBackend = self;
        let item = this
            .entries
            .iter()
            .find(|e| e.entry.key == entry.key)
            .ok_or_else(|| ExtractError::NotFound(entry.key.clone()))?;
        Ok(Box::new(this.reader_for(item)))
    }

    fn for_each_sequential(
        &mut self,
        _listing: &Listing,
        password: Option<&str>,
        visit: &mut EntryVisitor<'_>,
    ) -> ExtractResult<()> {
        self.stats.passes.fetch_add(1, Ordering::SeqCst);
        self.check_password(password)?;

        for item in &self.entries {
            self.stats
                .visited
                .lock()
                .unwrap()
                .push(item.entry.key.clone());
            let mut reader = self.reader_for(item);
            if visit(&item.entry, &mut reader)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}
