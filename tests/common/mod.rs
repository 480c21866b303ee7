use emmm2_extract::ExtractSettings;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub struct TestContext {
    pub dir: TempDir,
    pub settings: Arc<ExtractSettings>,
}

/// Temp workspace with diagnostics redirected into it.
pub fn context() -> TestContext {
    init_logger();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let settings = Arc::new(ExtractSettings {
        diagnostics_dir: dir.path().join("diag"),
        ..Default::default()
    });
    TestContext { dir, settings }
}

/// ZIP with `files`; names ending in `/` become directories. A password
/// encrypts every file with AES-256.
pub fn write_zip(path: &Path, files: &[(&str, &[u8])], password: Option<&str>) {
    let file = fs::File::create(path).expect("Failed to create zip");
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in files {
        let mut options = SimpleFileOptions::default();
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
            continue;
        }
        if let Some(pw) = password {
            options = options.with_aes_encryption(zip::AesMode::Aes256, pw);
        }
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}
