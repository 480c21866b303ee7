//! Archives read through the external 7-Zip executable (rar, solid 7z and
//! whatever else the installed 7-Zip understands).

pub mod listing;
pub mod process;

use crate::services::archive::backend::{drain_entry, ArchiveBackend, EntryVisitor};
use crate::services::archive::types::{ArchiveEntry, ArchiveFormat, Listing};
use crate::types::errors::{ExtractError, ExtractResult};
use listing::{detect_failure, first_error_line, parse_listing};
use process::ToolProcess;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub struct ToolBackend {
    exe: PathBuf,
    archive: PathBuf,
    /// Every listed file row in archive order, duplicates included. This is
    /// the byte layout of an `e -so` run over exactly these names.
    layout: Vec<StreamSlot>,
}

#[derive(Debug, Clone)]
struct StreamSlot {
    key: String,
    /// Name exactly as the tool printed it.
    raw_name: String,
    size: u64,
}

impl ToolBackend {
    pub fn new(exe: &Path, archive: &Path) -> ExtractResult<Self> {
        if !archive.is_file() {
            return Err(ExtractError::Unsupported(format!(
                "Archive not found: {}",
                archive.display()
            )));
        }
        Ok(Self {
            exe: exe.to_path_buf(),
            archive: archive.to_path_buf(),
            layout: Vec::new(),
        })
    }

    /// Common switches: UTF-8 console output and an explicit (possibly
    /// empty) password so the tool never prompts.
    fn args(&self, command: &str, extra: &[&str], password: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![command.into(), "-sccUTF-8".into()];
        args.extend(extra.iter().map(OsString::from));
        args.push(format!("-p{}", password.unwrap_or_default()).into());
        args.push("--".into());
        args.push(self.archive.clone().into_os_string());
        args
    }

    /// Layout slots of the files in `listing`. Only these are requested from
    /// the tool, so rows the listing dropped never reach the stream.
    fn slots_for<'s>(&'s self, listing: &Listing) -> Vec<&'s StreamSlot> {
        self.layout
            .iter()
            .filter(|slot| listing.get(&slot.key).is_some_and(|e| e.is_file()))
            .collect()
    }
}

/// `e -so` arguments naming each raw name once; `-spd` turns off wildcard
/// matching so names are taken literally.
fn name_args(slots: &[&StreamSlot]) -> Vec<OsString> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut names = Vec::new();
    for slot in slots.iter().copied() {
        if seen.insert(slot.raw_name.as_str()) {
            names.push(OsString::from(&slot.raw_name));
        }
    }
    names
}

impl ArchiveBackend for ToolBackend {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::ExternalTool
    }

    fn label(&self) -> String {
        super::label_for(&self.archive)
    }

    fn list(&mut self, password: Option<&str>) -> ExtractResult<Listing> {
        let output = ToolProcess::run_to_end(&self.exe, &self.args("l", &[], password))?;

        if let Some(err) = detect_failure(&output.stdout, &output.stderr) {
            return Err(err);
        }
        if !output.status.success() {
            return Err(ExtractError::List(format!(
                "7-Zip exited with {}: {}",
                output.status,
                first_error_line(&output.stderr)
            )));
        }

        let parsed = parse_listing(&output.stdout)?;
        self.layout = parsed
            .rows
            .iter()
            .filter(|row| row.entry.is_file())
            .map(|row| StreamSlot {
                key: row.entry.key.clone(),
                raw_name: row.raw_name.clone(),
                size: row.entry.size,
            })
            .collect();

        let entries = parsed.rows.into_iter().map(|row| row.entry).collect();
        Ok(Listing::new(entries, parsed.is_solid, false))
    }

    fn open_entry<'a>(
        &'a mut self,
        entry: &ArchiveEntry,
        password: Option<&str>,
    ) -> ExtractResult<Box<dyn Read + 'a>> {
        let position = self
            .layout
            .iter()
            .rposition(|slot| slot.key == entry.key)
            .ok_or_else(|| ExtractError::NotFound(entry.key.clone()))?;
        let target = &self.layout[position];

        // Earlier rows under the same name come out of the tool first
        let skip: u64 = self.layout[..position]
            .iter()
            .filter(|slot| slot.raw_name == target.raw_name)
            .map(|slot| slot.size)
            .sum();

        let mut args = self.args("e", &["-so", "-spd", "-bso0"], password);
        args.push(OsString::from(&target.raw_name));
        let mut process = ToolProcess::spawn(&self.exe, &args)?;
        if skip == 0 {
            return Ok(Box::new(process));
        }

        io::copy(&mut (&mut process).take(skip), &mut io::sink())
            .map_err(|e| ExtractError::read(&entry.key, e))?;
        Ok(Box::new(process.take(target.size)))
    }

    /// One `e -so` run over the listed files prints them back to back in
    /// archive order; the stream is cut into entries by their listed sizes.
    /// A key listed more than once is handed to `visit` at its last
    /// occurrence only.
    fn for_each_sequential(
        &mut self,
        listing: &Listing,
        password: Option<&str>,
        visit: &mut EntryVisitor<'_>,
    ) -> ExtractResult<()> {
        for entry in listing.entries.iter().filter(|e| e.is_directory()) {
            if visit(entry, &mut io::empty())?.is_break() {
                return Ok(());
            }
        }

        let slots = self.slots_for(listing);
        if slots.is_empty() {
            return Ok(());
        }

        let mut args = self.args("e", &["-so", "-spd", "-bso0"], password);
        args.extend(name_args(&slots));
        let last: HashMap<&str, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.key.as_str(), i))
            .collect();
        let mut process = ToolProcess::spawn(&self.exe, &args)?;

        for (i, slot) in slots.iter().enumerate() {
            let mut part = (&mut process).take(slot.size);
            if last.get(slot.key.as_str()) == Some(&i) {
                if let Some(entry) = listing.get(&slot.key) {
                    if visit(entry, &mut part)?.is_break() {
                        // Dropping the process kills the rest of the run
                        return Ok(());
                    }
                }
            }
            drain_entry(&slot.key, &mut part)?;
        }

        let (status, stderr) = process.finish()?;
        if let Some(err) = detect_failure("", &stderr) {
            return Err(err);
        }
        if !status.success() {
            return Err(ExtractError::read(
                &self.label(),
                format!("7-Zip exited with {status}: {}", first_error_line(&stderr)),
            ));
        }
        Ok(())
    }
}
