//! Archive reading: central-directory load and the per-entry decode
//! pipeline behind list, test and extract
//!
//! Opening an archive locates the EOCD, walks the central directory and
//! resolves ZIP64 extras into full 64-bit entries. Decoding an entry
//! seeks to its local header, validates it against the central record,
//! strips the encryption header when present, streams the payload
//! through the method decoder, and verifies both the produced byte count
//! and the CRC.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;

use crate::codec;
use crate::context::ZuContext;
use crate::crypto::{expected_check_byte, verify_encryption_header, DecryptReader, Keys};
use crate::entry::Entry;
use crate::error::{Result, ZuError};
use crate::fsio::{self, COPY_CHUNK};
use crate::headers::{
    parse_zip64_extra, CentralFileHeader, LocalFileHeader, CENTRAL_FILE_HEADER_LEN,
    ENCRYPTION_HEADER_LEN, LOCAL_FILE_HEADER_LEN, ZIP64_SENTINEL,
};
use crate::locator::{self, Directory};
use crate::policy::{junk_basename, reject_unsafe_path, Selector};

/// Open archive with its parsed central directory.
pub struct ArchiveReader {
    file: BufReader<File>,
    directory: Directory,
    entries: Vec<Entry>,
}

/// Counters reported by a read-side pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadReport {
    pub matched: usize,
    pub extracted: usize,
    pub skipped: usize,
}

impl ArchiveReader {
    /// Open an archive and load its central directory.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = File::open(path).map_err(|e| {
            ZuError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mut file = BufReader::new(raw);
        let directory = locator::locate(&mut file)?;
        let entries = read_central_directory(&mut file, &directory)?;
        Ok(ArchiveReader {
            file,
            directory,
            entries,
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn comment(&self) -> &[u8] {
        &self.directory.comment
    }

    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Hand the pieces to a modify run: file handle, directory, entries.
    pub fn into_parts(self) -> (BufReader<File>, Directory, Vec<Entry>) {
        (self.file, self.directory, self.entries)
    }

    /// Decode one entry into `out`, verifying size and CRC.
    pub fn decode_entry_to(
        &mut self,
        index: usize,
        out: &mut dyn Write,
        password: Option<&[u8]>,
    ) -> Result<()> {
        let entry = self.entries[index].clone();
        decode_entry(&mut self.file, &entry, out, password)
    }

    /// Convenience used by tests and the modify orchestrator: decode a
    /// whole entry into memory.
    pub fn read_entry_by_name(&mut self, name: &str, password: Option<&[u8]>) -> Result<Vec<u8>> {
        let index = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| ZuError::NoFiles(format!("{}: not found in archive", name)))?;
        let mut out = Vec::new();
        self.decode_entry_to(index, &mut out, password)?;
        Ok(out)
    }

    /// List matching entries. Formatting problems never fail the pass;
    /// an include pattern that matched nothing does, after the fact.
    pub fn list(&mut self, ctx: &mut ZuContext) -> Result<ReadReport> {
        let mut selector = Selector::new(
            &ctx.include_patterns,
            &ctx.exclude_patterns,
            ctx.case_insensitive,
        )?;
        let mut report = ReadReport::default();
        let mut total_bytes = 0u64;
        if ctx.quiet == 0 {
            println!("  Length      Date    Time    Name");
            println!("---------  ---------- -----   ----");
        }
        for entry in &self.entries {
            if !selector.matches(&entry.name) || !ctx.within_time_window(entry.mtime_unix()) {
                continue;
            }
            report.matched += 1;
            total_bytes += entry.uncompressed_size;
            if ctx.quiet == 0 {
                let (date, time) = format_dos(entry.dos_date, entry.dos_time);
                if ctx.verbose {
                    println!(
                        "{:>9}  {:>8} {:>3}% {} {}  {:08x}  {}",
                        entry.uncompressed_size,
                        codec::method_name(entry.method),
                        entry.ratio_percent(),
                        date,
                        time,
                        entry.crc32,
                        entry.name
                    );
                } else {
                    println!(
                        "{:>9}  {} {}   {}",
                        entry.uncompressed_size, date, time, entry.name
                    );
                }
            }
        }
        if ctx.quiet == 0 {
            println!("---------                     -------");
            println!("{:>9}                     {} files", total_bytes, report.matched);
        }
        finish_selection(&selector)?;
        if report.matched == 0 {
            return Err(ZuError::NoFiles("nothing to list".into()));
        }
        Ok(report)
    }

    /// Decode every matching entry, discarding output. Aborts on the
    /// first failing entry.
    pub fn test(&mut self, ctx: &mut ZuContext) -> Result<ReadReport> {
        let mut selector = Selector::new(
            &ctx.include_patterns,
            &ctx.exclude_patterns,
            ctx.case_insensitive,
        )?;
        let mut report = ReadReport::default();
        for index in 0..self.entries.len() {
            let entry = self.entries[index].clone();
            if !selector.matches(&entry.name) || !ctx.within_time_window(entry.mtime_unix()) {
                continue;
            }
            report.matched += 1;
            reject_unsafe_path(&entry.name)?;
            if entry.is_dir() {
                continue;
            }
            if ctx.quiet == 0 {
                print!("    testing: {} ...", entry.name);
            }
            decode_entry(
                &mut self.file,
                &entry,
                &mut std::io::sink(),
                ctx.password.as_deref(),
            )?;
            if ctx.quiet == 0 {
                println!(" OK");
            }
            report.extracted += 1;
        }
        finish_selection(&selector)?;
        if report.matched == 0 {
            return Err(ZuError::NoFiles("nothing to test".into()));
        }
        Ok(report)
    }

    /// Restore matching entries to the filesystem (or stdout). Aborts on
    /// the first failing entry.
    pub fn extract(&mut self, ctx: &mut ZuContext) -> Result<ReadReport> {
        let mut selector = Selector::new(
            &ctx.include_patterns,
            &ctx.exclude_patterns,
            ctx.case_insensitive,
        )?;
        let mut report = ReadReport::default();
        for index in 0..self.entries.len() {
            let entry = self.entries[index].clone();
            if !selector.matches(&entry.name) || !ctx.within_time_window(entry.mtime_unix()) {
                continue;
            }
            report.matched += 1;
            reject_unsafe_path(&entry.name)?;

            if entry.is_dir() {
                if !ctx.to_stdout && !ctx.junk_paths {
                    let dest = ctx.dest_dir.join(entry.name.trim_end_matches('/'));
                    std::fs::create_dir_all(&dest)?;
                }
                continue;
            }

            let out_name = if ctx.junk_paths {
                junk_basename(&entry.name).to_string()
            } else {
                entry.name.clone()
            };

            if ctx.to_stdout {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                decode_entry(&mut self.file, &entry, &mut lock, ctx.password.as_deref())?;
                report.extracted += 1;
                continue;
            }

            let dest = ctx.dest_dir.join(&out_name);
            if dest.symlink_metadata().is_ok() && !ctx.overwrite {
                if ctx.quiet == 0 {
                    println!("    skipping: {} (exists)", out_name);
                }
                report.skipped += 1;
                continue;
            }
            fsio::mkdir_parents(&dest)?;

            if entry.is_symlink() {
                let mut target = Vec::new();
                decode_entry(&mut self.file, &entry, &mut target, ctx.password.as_deref())?;
                fsio::make_symlink(&target, &dest)?;
                report.extracted += 1;
                if ctx.quiet == 0 {
                    println!("    linking: {} -> {}", out_name, String::from_utf8_lossy(&target));
                }
                continue;
            }

            let mut out = File::create(&dest)?;
            match decode_entry(&mut self.file, &entry, &mut out, ctx.password.as_deref()) {
                Ok(()) => {}
                Err(err) => {
                    // no partial files from a failed entry
                    drop(out);
                    let _ = std::fs::remove_file(&dest);
                    return Err(err);
                }
            }
            if let Some(mode) = entry.unix_mode() {
                fsio::restore_mode(&dest, mode)?;
            }
            fsio::restore_mtime(&out, entry.mtime_unix())?;
            report.extracted += 1;
            if ctx.quiet == 0 {
                let verb = if entry.method == codec::METHOD_STORE {
                    " extracting"
                } else {
                    "  inflating"
                };
                println!("{}: {}", verb, out_name);
            }
        }
        finish_selection(&selector)?;
        if report.matched == 0 {
            return Err(ZuError::NoFiles("nothing to extract".into()));
        }
        Ok(report)
    }
}

/// Post-pass include check shared by the read operations.
fn finish_selection(selector: &Selector) -> Result<()> {
    let unmatched = selector.unmatched_includes();
    if !unmatched.is_empty() {
        for pattern in &unmatched {
            eprintln!("caution: filename not matched:  {}", pattern);
        }
        return Err(ZuError::NoFiles(format!(
            "{} pattern(s) not matched",
            unmatched.len()
        )));
    }
    Ok(())
}

fn format_dos(date: u16, time: u16) -> (String, String) {
    let y = 1980 + ((date >> 9) & 0x7F);
    let m = (date >> 5) & 0x0F;
    let d = date & 0x1F;
    let hh = (time >> 11) & 0x1F;
    let mm = (time >> 5) & 0x3F;
    (
        format!("{:04}-{:02}-{:02}", y, m, d),
        format!("{:02}:{:02}", hh, mm),
    )
}

/// Walk the central directory into full entries.
fn read_central_directory(
    file: &mut BufReader<File>,
    directory: &Directory,
) -> Result<Vec<Entry>> {
    file.seek(SeekFrom::Start(directory.cd_offset))?;
    let capacity = directory.entries_total.min(0xFFFF) as usize;
    let mut entries = Vec::with_capacity(capacity);
    let mut fixed = [0u8; CENTRAL_FILE_HEADER_LEN];
    for _ in 0..directory.entries_total {
        file.read_exact(&mut fixed)?;
        let header = CentralFileHeader::parse(&fixed)?;

        let mut name_raw = vec![0u8; header.name_len as usize];
        file.read_exact(&mut name_raw)?;
        let mut extra = vec![0u8; header.extra_len as usize];
        file.read_exact(&mut extra)?;
        let mut comment = vec![0u8; header.comment_len as usize];
        file.read_exact(&mut comment)?;

        let uncomp_sentinel = header.uncompressed_size == ZIP64_SENTINEL;
        let comp_sentinel = header.compressed_size == ZIP64_SENTINEL;
        let offset_sentinel = header.local_header_offset == ZIP64_SENTINEL;
        let zip64 = parse_zip64_extra(&extra, uncomp_sentinel, comp_sentinel, offset_sentinel);

        let name = String::from_utf8_lossy(&name_raw).into_owned();
        entries.push(Entry {
            name,
            name_raw,
            version_made_by: header.version_made_by,
            version_needed: header.version_needed,
            flags: header.flags,
            method: header.method,
            dos_time: header.dos_time,
            dos_date: header.dos_date,
            crc32: header.crc32,
            compressed_size: zip64
                .compressed_size
                .unwrap_or(header.compressed_size as u64),
            uncompressed_size: zip64
                .uncompressed_size
                .unwrap_or(header.uncompressed_size as u64),
            internal_attrs: header.internal_attrs,
            external_attrs: header.external_attrs,
            local_header_offset: zip64
                .local_header_offset
                .unwrap_or(header.local_header_offset as u64),
            extra,
            comment,
            state: Default::default(),
        });
    }
    Ok(entries)
}

/// The decode pipeline for one entry: seek, validate, decrypt,
/// decompress, verify.
pub fn decode_entry<F: Read + Seek>(
    file: &mut F,
    entry: &Entry,
    out: &mut dyn Write,
    password: Option<&[u8]>,
) -> Result<()> {
    file.seek(SeekFrom::Start(entry.local_header_offset))?;
    let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN];
    file.read_exact(&mut fixed)?;
    let local = LocalFileHeader::parse(&fixed)?;

    let mut local_name = vec![0u8; local.name_len as usize];
    file.read_exact(&mut local_name)?;
    if local_name != entry.name_raw {
        return Err(ZuError::Usage(format!(
            "local header name mismatch for {}",
            entry.name
        )));
    }
    file.seek(SeekFrom::Current(local.extra_len as i64))?;

    let mut comp_size = entry.compressed_size;
    let keys = if entry.is_encrypted() {
        let password = password.ok_or(ZuError::PasswordRequired)?;
        let mut keys = Keys::new(password);
        let mut header = [0u8; ENCRYPTION_HEADER_LEN];
        file.read_exact(&mut header)?;
        let check = expected_check_byte(entry.flags, entry.crc32, entry.dos_time);
        if !verify_encryption_header(&mut keys, &header, check) {
            return Err(ZuError::BadPassword);
        }
        comp_size = comp_size.saturating_sub(ENCRYPTION_HEADER_LEN as u64);
        Some(keys)
    } else {
        None
    };

    let limited = (&mut *file).take(comp_size);
    let source: Box<dyn Read + '_> = match keys {
        Some(keys) => Box::new(DecryptReader::new(limited, keys)),
        None => Box::new(limited),
    };
    let mut decoder = codec::decoder(entry.method, source)?;

    let mut crc = Crc32::new();
    let mut produced = 0u64;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let got = decoder.read(&mut buf)?;
        if got == 0 {
            break;
        }
        crc.update(&buf[..got]);
        out.write_all(&buf[..got])?;
        produced += got as u64;
    }

    if produced != entry.uncompressed_size {
        return Err(ZuError::invalid_data(format!(
            "{}: decoded {} bytes, expected {}",
            entry.name, produced, entry.uncompressed_size
        )));
    }
    let crc = crc.finalize();
    if crc != entry.crc32 {
        return Err(ZuError::invalid_data(format!(
            "{}: bad CRC {:08x} (should be {:08x})",
            entry.name, crc, entry.crc32
        )));
    }
    Ok(())
}
