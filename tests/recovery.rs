use std::fs;

use tempfile::tempdir;

use zu::context::{FixLevel, ZuContext};
use zu::modify;
use zu::reader::ArchiveReader;
use zu::writer::{ArchiveWriter, EntryPlan};

/// Chop the central directory off an archive, rebuild it with fix-fix,
/// and read everything back.
#[test]
fn fix_fix_rebuilds_truncated_archive() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, "alpha alpha alpha alpha").unwrap();
    fs::write(&b, "beta beta beta beta beta").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = ZuContext::new(&archive);
    ctx.junk_paths = true;
    ctx.quiet = 2;
    ctx.input_paths = vec![a.display().to_string(), b.display().to_string()];
    modify::run(&mut ctx).unwrap();

    // find where entry data ends and drop everything after it
    let reader = ArchiveReader::open(&archive).unwrap();
    let (_, directory, _) = reader.into_parts();
    let bytes = fs::read(&archive).unwrap();
    fs::write(&archive, &bytes[..directory.cd_offset as usize]).unwrap();
    assert!(ArchiveReader::open(&archive).is_err());

    let mut ctx = ZuContext::new(&archive);
    ctx.quiet = 2;
    ctx.fix = FixLevel::FixFix;
    modify::run(&mut ctx).unwrap();

    let mut reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(
        reader.read_entry_by_name("a.txt", None).unwrap(),
        b"alpha alpha alpha alpha"
    );
    assert_eq!(
        reader.read_entry_by_name("b.txt", None).unwrap(),
        b"beta beta beta beta beta"
    );
}

/// Descriptor entries survive recovery too: the scanner estimates the
/// span from the next header and lifts CRC and sizes from the
/// descriptor itself.
#[test]
fn fix_fix_recovers_streamed_entries() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("streamed.zip");

    let mut writer = ArchiveWriter::new(Vec::new(), u32::MAX as u64);
    let plan = EntryPlan {
        name: "flow.txt".to_string(),
        method: zu::codec::METHOD_DEFLATE,
        level: 6,
        mtime_unix: 1_700_000_000,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        strip_extras: false,
    };
    let mut source: &[u8] = b"streamed streamed streamed";
    writer.add_stream(&plan, &mut source, None, None).unwrap();
    let mut stage = Vec::new();
    let staged_plan = EntryPlan {
        name: "anchor.txt".to_string(),
        ..plan
    };
    writer
        .add_data_staged(&staged_plan, b"anchor", &mut stage, None)
        .unwrap();
    let bytes = writer.finish(b"").unwrap();

    // keep only the entry data: both local records, no central directory
    let reader_bytes = {
        fs::write(&archive, &bytes).unwrap();
        let reader = ArchiveReader::open(&archive).unwrap();
        let (_, directory, _) = reader.into_parts();
        bytes[..directory.cd_offset as usize].to_vec()
    };
    fs::write(&archive, &reader_bytes).unwrap();

    let mut ctx = ZuContext::new(&archive);
    ctx.quiet = 2;
    ctx.fix = FixLevel::FixFix;
    modify::run(&mut ctx).unwrap();

    let mut reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(
        reader.read_entry_by_name("flow.txt", None).unwrap(),
        b"streamed streamed streamed"
    );
    assert_eq!(
        reader.read_entry_by_name("anchor.txt", None).unwrap(),
        b"anchor"
    );
}

/// Plain fix trusts the central directory and rewrites around it even
/// when nothing else changed.
#[test]
fn plain_fix_rewrites_in_place() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "content").unwrap();
    let archive = dir.path().join("test.zip");

    let mut ctx = ZuContext::new(&archive);
    ctx.junk_paths = true;
    ctx.quiet = 2;
    ctx.input_paths = vec![a.display().to_string()];
    modify::run(&mut ctx).unwrap();

    let mut ctx = ZuContext::new(&archive);
    ctx.quiet = 2;
    ctx.fix = FixLevel::Fix;
    assert!(matches!(
        modify::run(&mut ctx).unwrap(),
        modify::RunOutcome::Written(_)
    ));
    let mut reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.read_entry_by_name("a.txt", None).unwrap(), b"content");
}
