//! Parser for the table printed by `7z l`.
//!
//! ```text
//!    Date      Time    Attr         Size   Compressed  Name
//! ------------------- ----- ------------ ------------  ------------------------
//! 2023-04-01 10:15:30 D....            0            0  Mod
//! 2023-04-01 10:15:30 ....A         1024          512  Mod/merged.ini
//! ```
//!
//! Rows are fixed width up to the name column; some formats leave the date
//! and time blank. Anything that does not fit the row grammar (banners,
//! headers, the totals line) is skipped.

use crate::services::archive::types::ArchiveEntry;
use crate::services::fs_utils::path_utils::{is_key_safe, normalize_key};
use crate::types::errors::{ExtractError, ExtractResult};
use regex::Regex;
use std::sync::LazyLock;

/// Shorter lines cannot hold a row.
pub const MIN_ROW_LEN: usize = 20;

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}| {19}) ([D.]\S{4}) ([ \d]{12}) ([ \d]{12})  (.+)$",
    )
    .expect("valid listing row regex")
});
static SOLID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Solid = \+\s*$").expect("valid solid regex"));

const TABLE_RULE: &str = "------------------- -----";

/// One parsed table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRow {
    pub entry: ArchiveEntry,
    /// Name exactly as printed, passed back to the tool when extracting.
    pub raw_name: String,
    /// Empty when the tool printed no timestamp.
    pub modified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolListing {
    pub rows: Vec<ToolRow>,
    pub is_solid: bool,
}

/// Parse captured `7z l` stdout. Fails only when no entry table is present
/// at all.
pub fn parse_listing(stdout: &str) -> ExtractResult<ToolListing> {
    let mut saw_table = false;
    let mut rows = Vec::new();

    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(TABLE_RULE) {
            saw_table = true;
            continue;
        }
        if let Some(row) = parse_row(line) {
            rows.push(row);
        }
    }

    if !saw_table {
        return Err(ExtractError::List(
            "No entry table in 7-Zip output".to_string(),
        ));
    }

    Ok(ToolListing {
        rows,
        is_solid: SOLID_RE.is_match(stdout),
    })
}

/// `None` for anything that is not an entry row.
pub fn parse_row(line: &str) -> Option<ToolRow> {
    if line.len() < MIN_ROW_LEN {
        return None;
    }
    let caps = ROW_RE.captures(line)?;

    let attrs = &caps[2];
    let size_col = caps[3].trim();
    let size = if size_col.is_empty() {
        0
    } else {
        size_col.parse::<u64>().ok()?
    };
    let raw_name = caps[5].to_string();

    let key = normalize_key(&raw_name);
    if key.is_empty() {
        return None;
    }
    if !is_key_safe(&key) {
        log::warn!("Skipping unsafe entry in tool listing: {raw_name}");
        return None;
    }

    let entry = if attrs.starts_with('D') {
        ArchiveEntry::directory(key)
    } else {
        ArchiveEntry::file(key, size)
    };

    Some(ToolRow {
        entry,
        raw_name,
        modified: caps[1].trim().to_string(),
    })
}

/// Known failure markers in tool output, in order of precedence.
pub fn detect_failure(stdout: &str, stderr: &str) -> Option<ExtractError> {
    let combined = format!("{stderr}\n{stdout}");
    let lower = combined.to_lowercase();

    if lower.contains("wrong password") || lower.contains("can not open encrypted archive") {
        return Some(ExtractError::IncorrectPassword);
    }
    if lower.contains("can not open the file as archive")
        || lower.contains("is not archive")
        || lower.contains("unsupported method")
    {
        return Some(ExtractError::Unsupported(first_error_line(&combined)));
    }
    if lower.contains("cannot find archive") || lower.contains("cannot find the file") {
        return Some(ExtractError::Unsupported(first_error_line(&combined)));
    }
    None
}

/// First line that looks like an error, else the first non-empty line.
pub fn first_error_line(output: &str) -> String {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.clone().next().unwrap_or("7-Zip failed").to_string();
    lines
        .find(|l| l.starts_with("ERROR") || l.contains("Error"))
        .map(str::to_string)
        .unwrap_or(first)
}
