use super::*;
use crate::services::archive::backend::ArchiveBackend;
use crate::test_utils::{init_logger, FakeClock, FlakyOpener, MemoryBackend};
use crate::services::fs_utils::file_utils::DiskOpener;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    settings: ExtractSettings,
    clock: FakeClock,
}

impl Harness {
    fn new() -> Self {
        init_logger();
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("out");
        let settings = ExtractSettings {
            diagnostics_dir: tmp.path().join("diag"),
            ..Default::default()
        };
        Self {
            _tmp: tmp,
            root,
            settings,
            clock: FakeClock::new(),
        }
    }

    fn copy(
        &self,
        backend: &mut MemoryBackend,
        opener: &dyn FileOpener,
        progress: Option<&dyn ProgressSink>,
        cancel: Option<&AtomicBool>,
    ) -> ExtractResult<CopyReport> {
        let listing = backend.list(None).unwrap();
        let mut mapping = mirror_into(&self.root);
        let plan: Vec<CopyPlanEntry> = listing
            .entries
            .iter()
            .map(|e| CopyPlanEntry {
                entry: e.clone(),
                destination: mapping(e),
            })
            .collect();
        let ctx = CopyContext {
            settings: &self.settings,
            opener,
            clock: &self.clock,
            progress,
            cancel,
            label: "memory.bin",
        };
        Materializer::new(ctx, &plan).run(backend, &listing, &plan, None)
    }
}

fn abc() -> [(&'static str, Vec<u8>); 3] {
    [
        ("a.txt", vec![b'a'; 10]),
        ("b.txt", vec![b'b'; 20]),
        ("c.txt", vec![b'c'; 5]),
    ]
}

#[test]
fn test_mirror_into_drops_escaping_keys() {
    let mut mapping = mirror_into("/dest");
    assert_eq!(
        mapping(&ArchiveEntry::file("mod/a.ini", 1)),
        Some(PathBuf::from("/dest/mod/a.ini"))
    );
    assert_eq!(mapping(&ArchiveEntry::file("../evil.dll", 1)), None);
}

#[test]
fn test_random_access_copy() {
    let h = Harness::new();
    let mut backend = MemoryBackend::random_access(abc()).with_directory("textures");

    let report = h.copy(&mut backend, &DiskOpener, None, None).unwrap();

    assert_eq!(report.files_written, 3);
    assert_eq!(report.directories_created, 1);
    assert_eq!(report.bytes_written, 35);
    assert!(!report.has_warnings());
    assert_eq!(fs::read(h.root.join("b.txt")).unwrap(), vec![b'b'; 20]);
    assert!(h.root.join("textures").is_dir());
}

#[test]
fn test_solid_copy_is_one_pass_and_stops_after_last_wanted() {
    let h = Harness::new();
    let mut backend = MemoryBackend::solid(abc());
    let stats = backend.stats();
    let listing = backend.list(None).unwrap();
    let plan: Vec<CopyPlanEntry> = listing
        .entries
        .iter()
        .map(|e| CopyPlanEntry {
            entry: e.clone(),
            destination: (e.key == "b.txt").then(|| h.root.join("b.txt")),
        })
        .collect();
    let ctx = CopyContext {
        settings: &h.settings,
        opener: &DiskOpener,
        clock: &h.clock,
        progress: None,
        cancel: None,
        label: "memory.bin",
    };

    let report = Materializer::new(ctx, &plan)
        .run(&mut backend, &listing, &plan, None)
        .unwrap();

    assert_eq!(report.files_written, 1);
    assert_eq!(stats.passes(), 1);
    assert_eq!(stats.visited(), vec!["a.txt", "b.txt"]);
    assert_eq!(stats.served("a.txt"), 0);
    assert!(!h.root.join("a.txt").exists());
    assert!(!h.root.join("c.txt").exists());
}

#[test]
fn test_locked_destination_recovers_on_third_attempt() {
    let h = Harness::new();
    let mut backend = MemoryBackend::solid([("a.txt", b"0123456789".to_vec())]);
    let opener = FlakyOpener::new(2);

    let report = h.copy(&mut backend, &opener, None, None).unwrap();

    assert_eq!(report.files_written, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(opener.calls(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(300), Duration::from_millis(300)]
    );
    assert_eq!(fs::read(h.root.join("a.txt")).unwrap(), b"0123456789");
}

#[test]
fn test_locked_destination_is_skipped_after_three_failures() {
    let h = Harness::new();
    let mut backend = MemoryBackend::solid(abc());
    let opener = FlakyOpener::new(3);

    let report = h.copy(&mut backend, &opener, None, None).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "a.txt");
    assert!(report.skipped[0].reason.contains("locked"));
    assert_eq!(report.files_written, 2);
    assert!(!h.root.join("a.txt").exists());
    assert!(h.root.join("c.txt").exists());
}

#[test]
fn test_stall_writes_diagnostic_dump() {
    let h = Harness::new();
    let mut backend = MemoryBackend::solid(abc()).stall_after("b.txt", 5);

    let err = h.copy(&mut backend, &DiskOpener, None, None).unwrap_err();

    let dump = match err {
        ExtractError::UnexpectedEnd {
            key,
            expected,
            received,
            dump_path,
        } => {
            assert_eq!(key, "b.txt");
            assert_eq!(expected, 20);
            assert_eq!(received, 5);
            dump_path.expect("dump written")
        }
        other => panic!("unexpected error: {other:?}"),
    };
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(500)]
    );
    assert!(dump.starts_with(&h.settings.diagnostics_dir));

    let mut archive = zip::ZipArchive::new(fs::File::open(&dump).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    assert_eq!(archive.by_name("a.txt").unwrap().size(), 10);
    assert_eq!(archive.by_name("b.txt").unwrap().size(), 5);
    assert!(!h.root.join("c.txt").exists());
}

#[test]
fn test_size_mismatch_is_fatal_and_removes_file() {
    let h = Harness::new();
    let mut backend = MemoryBackend::random_access(abc()).declare_size("b.txt", 4);

    let err = h.copy(&mut backend, &DiskOpener, None, None).unwrap_err();

    match err {
        ExtractError::SizeMismatch {
            key,
            expected,
            actual,
        } => {
            assert_eq!(key, "b.txt");
            assert_eq!(expected, 4);
            assert_eq!(actual, 20);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!h.root.join("b.txt").exists());
    assert!(h.root.join("a.txt").exists());
}

#[test]
fn test_progress_ticks_per_file() {
    let h = Harness::new();
    let mut backend = MemoryBackend::random_access(abc()).with_directory("empty");
    let ticks: Mutex<Vec<CopyProgress>> = Mutex::new(Vec::new());
    let sink = |p: &CopyProgress| ticks.lock().unwrap().push(p.clone());

    h.copy(&mut backend, &DiskOpener, Some(&sink), None).unwrap();

    let ticks = ticks.into_inner().unwrap();
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks[2].completed, 3);
    assert_eq!(ticks[2].total, 3);
    assert_eq!(ticks[0].current_file, "a.txt");
}

#[test]
fn test_cancelled_before_first_entry() {
    let h = Harness::new();
    let mut backend = MemoryBackend::solid(abc());
    let cancel = AtomicBool::new(true);

    let err = h.copy(&mut backend, &DiskOpener, None, Some(&cancel)).unwrap_err();

    assert!(matches!(err, ExtractError::Cancelled));
    assert!(!h.root.join("a.txt").exists());
}

#[test]
fn test_random_access_missing_entry_is_skipped() {
    let h = Harness::new();
    let mut backend = MemoryBackend::random_access(abc());
    let mut listing = backend.list(None).unwrap();
    listing.entries.push(ArchiveEntry::file("ghost.txt", 3));
    let plan: Vec<CopyPlanEntry> = listing
        .entries
        .iter()
        .map(|e| CopyPlanEntry {
            entry: e.clone(),
            destination: Some(h.root.join(&e.key)),
        })
        .collect();
    let ctx = CopyContext {
        settings: &h.settings,
        opener: &DiskOpener,
        clock: &h.clock,
        progress: None,
        cancel: None,
        label: "memory.bin",
    };

    let report = Materializer::new(ctx, &plan)
        .run(&mut backend, &listing, &plan, None)
        .unwrap();

    assert_eq!(report.files_written, 3);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "ghost.txt");
}
