use std::fs;
use std::time::{Duration, UNIX_EPOCH};

use tempfile::tempdir;

use zu::context::{RunMode, ZuContext};
use zu::modify::{self, RunOutcome};
use zu::reader::ArchiveReader;

fn set_mtime(path: &std::path::Path, unix: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(unix))
        .unwrap();
}

fn base_ctx(archive: &std::path::Path) -> ZuContext {
    let mut ctx = ZuContext::new(archive);
    ctx.junk_paths = true;
    ctx.quiet = 2;
    ctx
}

/// Update mode replaces an entry with a newer file and carries the other
/// entry over untouched, compressed bytes and all.
#[test]
fn update_replaces_newer_keeps_rest() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.bin");
    fs::write(&a, "old contents of a").unwrap();
    fs::write(&b, "b stays the same").unwrap();
    set_mtime(&a, 1_700_000_000);
    set_mtime(&b, 1_700_000_000);
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let before = ArchiveReader::open(&archive).unwrap();
    let b_before = before.find_entry("b.bin").unwrap().clone();
    drop(before);

    fs::write(&a, "fresh contents, longer than before").unwrap();
    set_mtime(&a, 1_700_000_100);

    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Update;
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let mut reader = ArchiveReader::open(&archive).unwrap();
    let names: Vec<_> = reader.entries().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names.iter().filter(|n| *n == "a.txt").count(), 1);
    assert_eq!(
        reader.read_entry_by_name("a.txt", None).unwrap(),
        b"fresh contents, longer than before"
    );
    let b_after = reader.find_entry("b.bin").unwrap();
    assert_eq!(b_after.crc32, b_before.crc32);
    assert_eq!(b_after.compressed_size, b_before.compressed_size);
    assert_eq!(
        reader.read_entry_by_name("b.bin", None).unwrap(),
        b"b stays the same"
    );
}

/// Update skips inputs that are not newer at DOS (2-second) precision.
#[test]
fn update_skips_equal_mtime() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "same old").unwrap();
    set_mtime(&a, 1_700_000_000);
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string()];
    modify::run(&mut ctx).unwrap();

    // touching within the same 2-second bucket changes nothing
    set_mtime(&a, 1_700_000_001);
    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Update;
    ctx.input_paths = vec![a.display().to_string()];
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        RunOutcome::NothingToDo
    ));
}

/// A modify with no inputs and no mode flags changes nothing on disk.
#[test]
fn empty_modify_leaves_archive_alone() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "content").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string()];
    modify::run(&mut ctx).unwrap();
    let before = fs::read(&archive).unwrap();

    let mut ctx = base_ctx(&archive);
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        RunOutcome::NothingToDo
    ));
    assert_eq!(fs::read(&archive).unwrap(), before);
}

/// Delete mode removes matching entries and nothing else.
#[test]
fn delete_removes_matching_entries() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.bin");
    fs::write(&a, "aaa").unwrap();
    fs::write(&b, "bbb").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Delete;
    ctx.input_paths = vec!["*.txt".to_string()];
    let outcome = modify::run(&mut ctx).unwrap();
    match outcome {
        RunOutcome::Written(report) => assert_eq!(report.deleted, 1),
        RunOutcome::NothingToDo => panic!("expected a rewrite"),
    }

    let mut reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 1);
    assert!(reader.find_entry("a.txt").is_none());
    assert_eq!(reader.read_entry_by_name("b.bin", None).unwrap(), b"bbb");
}

/// Delete honors the time window: matched entries outside it survive.
#[test]
fn delete_respects_time_window() {
    let dir = tempdir().unwrap();
    let old = dir.path().join("old.txt");
    let new = dir.path().join("new.txt");
    fs::write(&old, "old").unwrap();
    fs::write(&new, "new").unwrap();
    set_mtime(&old, 1_400_000_000);
    set_mtime(&new, 1_700_000_000);
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![old.display().to_string(), new.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Delete;
    ctx.input_paths = vec!["*.txt".to_string()];
    ctx.time_after = Some(1_500_000_000);
    modify::run(&mut ctx).unwrap();

    let reader = ArchiveReader::open(&archive).unwrap();
    // only the entry inside the window was deleted
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.entries()[0].name, "old.txt");
}

/// Copy mode materializes the selected entries into a fresh archive.
#[test]
fn copy_selects_into_new_archive() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.bin");
    fs::write(&a, "aaa").unwrap();
    fs::write(&b, "bbb").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();
    let original = fs::read(&archive).unwrap();

    let copy_to = dir.path().join("subset.zip");
    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Copy;
    ctx.out_path = Some(copy_to.clone());
    ctx.input_paths = vec!["b*".to_string()];
    modify::run(&mut ctx).unwrap();

    // source untouched, subset holds only the match
    assert_eq!(fs::read(&archive).unwrap(), original);
    let mut reader = ArchiveReader::open(&copy_to).unwrap();
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.read_entry_by_name("b.bin", None).unwrap(), b"bbb");
}

/// Re-setting the identical comment is not a change.
#[test]
fn same_comment_is_nothing_to_do() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "content").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.comment = Some(b"stable".to_vec());
    ctx.input_paths = vec![a.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let mut ctx = base_ctx(&archive);
    ctx.comment = Some(b"stable".to_vec());
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        RunOutcome::NothingToDo
    ));

    let mut ctx = base_ctx(&archive);
    ctx.comment = Some(b"changed".to_vec());
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        RunOutcome::Written(_)
    ));
    assert_eq!(
        ArchiveReader::open(&archive).unwrap().comment(),
        b"changed"
    );
}

/// A failing run must leave the target archive byte-identical and clean
/// up its temp file.
#[test]
fn failed_rewrite_leaves_target_untouched() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.bin");
    fs::write(&a, "aaa").unwrap();
    fs::write(&b, "bbb").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = base_ctx(&archive);
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();
    let mut bytes = fs::read(&archive).unwrap();

    // corrupt b.bin's central record: point its local header into space
    let target = bytes
        .windows(5)
        .position(|w| w == b"b.bin")
        .expect("central name present");
    // the second match is the central record (local header comes first)
    let central_name_at = bytes[target + 5..]
        .windows(5)
        .position(|w| w == b"b.bin")
        .map(|p| p + target + 5)
        .unwrap();
    let record_at = central_name_at - 46;
    bytes[record_at + 42..record_at + 46].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    fs::write(&archive, &bytes).unwrap();
    let corrupted = fs::read(&archive).unwrap();

    // deleting a.txt forces a carry-over of the broken b.bin
    let mut ctx = base_ctx(&archive);
    ctx.mode = RunMode::Delete;
    ctx.input_paths = vec!["a.txt".to_string()];
    assert!(modify::run(&mut ctx).is_err());

    assert_eq!(fs::read(&archive).unwrap(), corrupted);
    assert!(!dir.path().join("test.zip.tmp").exists());
}
