pub mod services;
pub mod types;
#[cfg(test)]
pub mod test_utils;

pub use services::archive::{
    mirror_into, ArchiveBackend, ArchiveEntry, ArchiveFormat, ArchiveSource, CopyProgress,
    CopyReport, Listing, PasswordState, ProgressSink,
};
pub use services::config::{ExtractSettings, RetryPolicy};
pub use types::errors::{ExtractError, ExtractResult};
