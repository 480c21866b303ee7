use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Creates destination files. The copy engine goes through this seam so a
/// locked destination can be simulated.
pub trait FileOpener: Send + Sync {
    fn create(&self, path: &Path) -> io::Result<fs::File>;
}

/// Plain `File::create`, creating missing parent folders first.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskOpener;

impl FileOpener for DiskOpener {
    fn create(&self, path: &Path) -> io::Result<fs::File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(path)
    }
}

/// Returns `path` if free, otherwise the first free `stem (N).ext`.
pub fn make_unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{} ({}){}", stem, counter, ext));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
