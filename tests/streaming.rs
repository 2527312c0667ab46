use std::fs;

use tempfile::tempdir;

use zu::codec::METHOD_DEFLATE;
use zu::context::EolMode;
use zu::fsio;
use zu::reader::ArchiveReader;
use zu::writer::{ArchiveWriter, EntryPlan};

fn stream_plan(name: &str) -> EntryPlan {
    EntryPlan {
        name: name.to_string(),
        method: METHOD_DEFLATE,
        level: 6,
        mtime_unix: 1_700_000_000,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        strip_extras: false,
    }
}

/// Streaming an unknown-size source writes a descriptor entry whose
/// final numbers match, and the result reads back bit-for-bit.
#[test]
fn stdin_style_stream_uses_descriptor() {
    let mut writer = ArchiveWriter::new(Vec::new(), u32::MAX as u64);
    let mut source: &[u8] = b"abcdef";
    writer
        .add_stream(&stream_plan("-"), &mut source, None, None)
        .unwrap();
    let bytes = writer.finish(b"").unwrap();

    // descriptor signature is always written
    assert!(bytes
        .windows(4)
        .any(|w| w == 0x08074b50u32.to_le_bytes()));

    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.zip");
    fs::write(&path, &bytes).unwrap();
    let mut reader = ArchiveReader::open(&path).unwrap();
    let entry = reader.find_entry("-").unwrap().clone();
    assert!(entry.has_data_descriptor());
    assert_eq!(entry.crc32, 0x4b8e39ef);
    assert_eq!(entry.uncompressed_size, 6);
    assert!(entry.compressed_size <= entry.uncompressed_size + 11);
    assert_eq!(reader.read_entry_by_name("-", None).unwrap(), b"abcdef");
}

/// Line translation runs before CRC and compression, so the stored CRC
/// matches the translated bytes.
#[test]
fn eol_translation_applies_before_crc() {
    let mut writer = ArchiveWriter::new(Vec::new(), u32::MAX as u64);
    let mut source: &[u8] = b"one\r\ntwo\r\n";
    writer
        .add_stream(
            &stream_plan("text.txt"),
            &mut source,
            Some(EolMode::CrLfToLf),
            None,
        )
        .unwrap();
    let bytes = writer.finish(b"").unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("eol.zip");
    fs::write(&path, &bytes).unwrap();
    let mut reader = ArchiveReader::open(&path).unwrap();
    let entry = reader.find_entry("text.txt").unwrap();
    assert_eq!(entry.uncompressed_size, 8);
    assert_eq!(entry.crc32, crc32fast::hash(b"one\ntwo\n"));
    assert_eq!(
        reader.read_entry_by_name("text.txt", None).unwrap(),
        b"one\ntwo\n"
    );
}

/// The stdin staging helper produces a seekable copy with size, CRC and
/// a text verdict.
#[test]
fn stage_stream_reports_size_crc_and_text() {
    let dir = tempdir().unwrap();
    let mut source: &[u8] = b"line one\nline two\n";
    let staged = fsio::stage_stream(&mut source, dir.path()).unwrap();
    assert_eq!(staged.size, 18);
    assert_eq!(staged.crc32, crc32fast::hash(b"line one\nline two\n"));
    assert!(staged.is_text);
    assert_eq!(fs::read(&staged.path).unwrap(), b"line one\nline two\n");

    let mut binary: &[u8] = &[0u8, 159, 146, 150, 0, 1, 2, 3];
    let staged = fsio::stage_stream(&mut binary, dir.path()).unwrap();
    assert!(!staged.is_text);
}
