//! Capability set every archive backend provides.
//!
//! Backends are synchronous. The source drives them from blocking worker
//! threads and owns all caching, password and retry policy, so a backend
//! only has to list, open single entries, and walk its stream once.

use super::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::types::errors::{ExtractError, ExtractResult};
use std::io::{self, Read};
use std::ops::ControlFlow;

/// Called once per entry of a sequential pass, in archive order.
/// `Break` ends the pass without decoding the rest of the stream.
pub type EntryVisitor<'a> =
    dyn FnMut(&ArchiveEntry, &mut dyn Read) -> ExtractResult<ControlFlow<()>> + 'a;

pub trait ArchiveBackend: Send {
    fn format(&self) -> ArchiveFormat;

    /// Short name for logs and diagnostic dumps.
    fn label(&self) -> String;

    /// Full entry listing plus the solid/encrypted flags.
    fn list(&mut self, password: Option<&str>) -> ExtractResult<Listing>;

    /// Stream one entry's bytes. Only used for non-solid sources.
    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>>;

    fn read_entry(&mut self, entry: &ArchiveEntry, password: Option<&str>) -> ExtractResult<Vec<u8>> {
        let mut reader = self.open_entry(entry, password)?;
        let mut buf = Vec::with_capacity(prealloc_hint(entry.size));
        reader
            .read_to_end(&mut buf)
            .map_err(|e| ExtractError::read(&entry.key, e))?;
        Ok(buf)
    }

    /// Walk the whole source once in archive order, handing each entry of
    /// `listing` to `visit`. The default opens entries one by one, which is
    /// all a random-access backend needs.
    fn for_each_sequential(
        &mut self,
        listing: &Listing,
        password: Option<&str>,
        visit: &mut EntryVisitor<'_>,
    ) -> ExtractResult<()> {
        for entry in &listing.entries {
            let step = if entry.is_directory() {
                visit(entry, &mut io::empty())?
            } else {
                let mut reader = self.open_entry(entry, password)?;
                visit(entry, &mut reader)?
            };
            if step.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Upper bound for buffers sized from untrusted entry headers.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

pub fn prealloc_hint(size: u64) -> usize {
    size.min(MAX_PREALLOC) as usize
}

/// Skip whatever a visitor left unread so the next entry starts at the
/// right stream offset.
pub fn drain_entry(key: &str, reader: &mut dyn Read) -> ExtractResult<()> {
    io::copy(reader, &mut io::sink())
        .map(|_| ())
        .map_err(|e| ExtractError::read(key, e))
}
