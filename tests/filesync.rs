use std::fs;
use std::time::{Duration, UNIX_EPOCH};

use tempfile::tempdir;

use zu::context::{RunMode, ZuContext};
use zu::modify::{self, RunOutcome};
use zu::reader::ArchiveReader;

// Filesync resolves entry names against the working directory, so this
// file holds a single test that owns the process cwd.
#[test]
fn filesync_mirrors_the_filesystem() {
    let dir = tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    fs::write("kept.txt", "kept").unwrap();
    fs::write("gone.txt", "gone").unwrap();
    fs::write("drift.txt", "drift v1").unwrap();
    let stamp = |p: &str, t: u64| {
        fs::File::options()
            .write(true)
            .open(p)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(t))
            .unwrap();
    };
    stamp("kept.txt", 1_700_000_000);
    stamp("drift.txt", 1_700_000_000);

    let mut ctx = ZuContext::new("test.zip");
    ctx.quiet = 2;
    ctx.input_paths = vec![
        "kept.txt".to_string(),
        "gone.txt".to_string(),
        "drift.txt".to_string(),
    ];
    modify::run(&mut ctx).unwrap();

    // the filesystem moves on: one file vanishes, one drifts
    fs::remove_file("gone.txt").unwrap();
    fs::write("drift.txt", "drift v2, now longer").unwrap();
    stamp("drift.txt", 1_700_000_100);

    let mut ctx = ZuContext::new("test.zip");
    ctx.quiet = 2;
    ctx.mode = RunMode::Filesync;
    ctx.input_paths = vec!["kept.txt".to_string(), "drift.txt".to_string()];
    let outcome = modify::run(&mut ctx).unwrap();
    match outcome {
        RunOutcome::Written(report) => {
            assert_eq!(report.added, 1); // drift re-materialized
            assert_eq!(report.deleted, 2); // old drift + vanished gone
        }
        RunOutcome::NothingToDo => panic!("expected a rewrite"),
    }

    let mut reader = ArchiveReader::open("test.zip".as_ref()).unwrap();
    assert_eq!(reader.entries().len(), 2);
    assert!(reader.find_entry("gone.txt").is_none());
    assert_eq!(
        reader.read_entry_by_name("drift.txt", None).unwrap(),
        b"drift v2, now longer"
    );
    assert_eq!(reader.read_entry_by_name("kept.txt", None).unwrap(), b"kept");

    // a second sync with a stable filesystem settles down
    let mut ctx = ZuContext::new("test.zip");
    ctx.quiet = 2;
    ctx.mode = RunMode::Filesync;
    ctx.input_paths = vec!["kept.txt".to_string(), "drift.txt".to_string()];
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        RunOutcome::NothingToDo
    ));
}
