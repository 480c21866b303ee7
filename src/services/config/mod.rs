pub mod models;

pub use models::*;

use crate::types::errors::{ExtractError, ExtractResult};
use std::path::{Path, PathBuf};

pub const ENV_SEVEN_ZIP: &str = "EMMM2_SEVEN_ZIP";
pub const ENV_DIAGNOSTICS_DIR: &str = "EMMM2_DIAGNOSTICS_DIR";

impl ExtractSettings {
    /// Defaults, then the optional JSON file, then environment overrides
    /// (a `.env` next to the process is honoured).
    pub fn load(path: Option<&Path>) -> ExtractResult<Self> {
        let mut settings = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };

        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env loaded: {e}");
        }
        settings.apply_env(|key| std::env::var(key).ok());

        log::debug!(
            "Extract settings: 7z={}, diagnostics={}",
            settings.seven_zip_path.display(),
            settings.diagnostics_dir.display()
        );
        Ok(settings)
    }

    pub fn from_json_file(path: &Path) -> ExtractResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Missing keys fall back to defaults.
    pub fn from_json(raw: &str) -> ExtractResult<Self> {
        serde_json::from_str(raw).map_err(|e| ExtractError::Config(format!("Invalid settings: {e}")))
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(exe) = lookup(ENV_SEVEN_ZIP).filter(|v| !v.trim().is_empty()) {
            self.seven_zip_path = PathBuf::from(exe.trim());
        }
        if let Some(dir) = lookup(ENV_DIAGNOSTICS_DIR).filter(|v| !v.trim().is_empty()) {
            self.diagnostics_dir = PathBuf::from(dir.trim());
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
