//! Concrete backends. Which one handles a locator is the caller's call;
//! `create_backend` only instantiates it.

pub mod directory;
pub mod sevenz;
pub mod tool;
pub mod zip_archive;

pub use directory::DirectoryBackend;
pub use sevenz::SevenZBackend;
pub use tool::ToolBackend;
pub use zip_archive::ZipBackend;

use super::backend::ArchiveBackend;
use super::types::ArchiveFormat;
use crate::services::config::ExtractSettings;
use crate::types::errors::ExtractResult;
use std::path::Path;

pub fn create_backend(
    path: &Path,
    format: ArchiveFormat,
    settings: &ExtractSettings,
) -> ExtractResult<Box<dyn ArchiveBackend>> {
    let backend: Box<dyn ArchiveBackend> = match format {
        ArchiveFormat::Directory => Box::new(DirectoryBackend::new(path)?),
        ArchiveFormat::Zip => Box::new(ZipBackend::open(path)?),
        ArchiveFormat::SevenZ => Box::new(SevenZBackend::new(path)?),
        ArchiveFormat::ExternalTool => Box::new(ToolBackend::new(&settings.seven_zip_path, path)?),
    };
    Ok(backend)
}

/// Display name of a locator: file name, or the full path as a fallback.
pub(crate) fn label_for(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod directory_tests;

#[cfg(test)]
#[path = "tests/zip_archive_tests.rs"]
mod zip_archive_tests;

#[cfg(test)]
#[path = "tests/sevenz_tests.rs"]
mod sevenz_tests;

#[cfg(test)]
#[path = "tests/tool_tests.rs"]
mod tool_tests;
