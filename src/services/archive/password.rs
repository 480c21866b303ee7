//! Password detection and validation.
//!
//! A listing alone cannot prove a password: many formats list fine and
//! only fail when content is decoded. So negotiation decodes one entry.
//! Solid sources use the first file, since any decode walks the stream
//! from the start anyway. Random-access sources use the smallest file,
//! the cheapest one to decode. Entries known to be plain are never probed.

use super::backend::{drain_entry, ArchiveBackend};
use super::types::{ArchiveEntry, Listing};
use crate::types::errors::{ExtractError, ExtractResult};
use std::ops::ControlFlow;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordState {
    /// Source is encrypted. Meaningful once `negotiated` is set.
    pub required: bool,
    /// Current password (or no password, for plain sources) decodes content.
    pub correct: bool,
    pub current_password: Option<String>,
    pub negotiated: bool,
}

impl PasswordState {
    /// Listing and content may be trusted.
    pub fn is_usable(&self) -> bool {
        self.negotiated && (!self.required || self.correct)
    }

    pub(crate) fn set_password(&mut self, password: &str) {
        self.current_password = Some(password.to_string());
        self.correct = false;
    }

    /// Outcome of a probe decode with the current password.
    pub(crate) fn record_probe(&mut self, listing: &Listing, decoded: bool) {
        self.negotiated = true;
        // Once seen encrypted, a source stays encrypted
        self.required |= listing.encrypted || !decoded;
        // Encrypted entries may exist beside the probed one; without a
        // password they still cannot be read.
        self.correct = decoded && !(listing.encrypted && self.current_password.is_none());
    }

    /// The listing itself is encrypted and could not be read.
    pub(crate) fn record_locked_listing(&mut self) {
        self.negotiated = true;
        self.required = true;
        self.correct = false;
    }
}

/// Entry decoded to validate a password, `None` for sources without files.
///
/// When the backend flags individual entries as encrypted, only those are
/// candidates: a plain entry decodes with any password.
pub fn probe_entry(listing: &Listing) -> Option<&ArchiveEntry> {
    let any_flagged = listing.encrypted && listing.files().any(|e| e.encrypted);
    let mut candidates = listing
        .files()
        .filter(move |e| !any_flagged || e.encrypted);
    if listing.is_solid {
        candidates.next()
    } else {
        candidates.min_by_key(|e| e.size)
    }
}

/// Decode the probe entry. `Ok(false)` means the password was rejected;
/// any other failure means the source is unusable.
pub fn verify_password(
    backend: &mut dyn ArchiveBackend,
    listing: &Listing,
    password: Option<&str>,
) -> ExtractResult<bool> {
    let Some(target) = probe_entry(listing) else {
        return Ok(true);
    };
    log::debug!(
        "Probing '{}' ({} bytes) on {}",
        target.key,
        target.size,
        backend.label()
    );

    let decoded = if listing.is_solid {
        backend.for_each_sequential(listing, password, &mut |entry, reader| {
            if entry.key != target.key {
                return Ok(ControlFlow::Continue(()));
            }
            drain_entry(&entry.key, reader)?;
            Ok(ControlFlow::Break(()))
        })
    } else {
        backend.read_entry(target, password).map(|_| ())
    };

    match decoded.map_err(|e| refine_password_error(e, password.is_some())) {
        Ok(()) => Ok(true),
        Err(ExtractError::IncorrectPassword) => Ok(false),
        Err(ExtractError::Read { key, reason }) => {
            Err(ExtractError::Unsupported(format!("Cannot decode '{key}': {reason}")))
        }
        Err(e) => Err(e),
    }
}

/// Backend and tool messages that mean "bad key" in some wording.
pub fn looks_like_password_failure(message: &str, password_supplied: bool) -> bool {
    let msg = message.to_lowercase();
    if msg.contains("password") || msg.contains("decrypt") {
        return true;
    }
    // A wrong key decodes to garbage, which surfaces as a checksum failure
    password_supplied && (msg.contains("crc") || msg.contains("checksum"))
}

/// Turn read failures caused by a bad key into `IncorrectPassword`.
pub fn refine_password_error(error: ExtractError, password_supplied: bool) -> ExtractError {
    let is_password = match &error {
        ExtractError::Read { reason, .. } => looks_like_password_failure(reason, password_supplied),
        ExtractError::Io(e) => looks_like_password_failure(&e.to_string(), password_supplied),
        _ => false,
    };
    if is_password {
        ExtractError::IncorrectPassword
    } else {
        error
    }
}

#[cfg(test)]
#[path = "tests/password_tests.rs"]
mod tests;
