use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bounded retry: `max_attempts` tries in total, `delay_ms` between them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExtractSettings {
    /// 7-Zip executable used by the external tool backend.
    pub seven_zip_path: PathBuf,
    /// Where partial archives are dumped after a truncated stream.
    pub diagnostics_dir: PathBuf,
    /// Destination file creation (locked files, AV scanners).
    pub create_retry: RetryPolicy,
    /// Zero-byte reads while an entry still expects data.
    pub stall_retry: RetryPolicy,
    pub buffer_size: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            seven_zip_path: PathBuf::from("7z"),
            diagnostics_dir: std::env::temp_dir()
                .join("emmm2-extract")
                .join("diagnostics"),
            create_retry: RetryPolicy::new(3, 300),
            stall_retry: RetryPolicy::new(3, 500),
            buffer_size: 64 * 1024,
        }
    }
}
