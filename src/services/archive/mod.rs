//! Archive content extraction: one contract over folders, ZIP, 7z and the
//! external 7-Zip tool, with lazy reads, solid preloading and bulk copies.

pub mod backend;
pub mod backends;
pub mod diagnostic;
pub mod materialize;
pub mod password;
pub mod preload;
pub mod source;
pub mod stream;
pub mod types;

pub use backend::{ArchiveBackend, EntryVisitor};
pub use materialize::{mirror_into, CopyPlanEntry};
pub use password::PasswordState;
pub use source::ArchiveSource;
pub use types::{
    ArchiveEntry, ArchiveFormat, CopyProgress, CopyReport, EntryKind, Listing, ProgressSink,
    SkippedEntry,
};
