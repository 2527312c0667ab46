//! Archive writing: entry emission, central directory, EOCD and ZIP64
//!
//! The writer appends entries to a plain `Write` sink, tracking a running
//! offset instead of seeking. Entries with a known, seekable source are
//! staged: compressed into a reusable buffer first so the local header can
//! carry final sizes, falling back to store when compression does not pay.
//! Non-seekable sources stream with flag bit 3 and trail a data
//! descriptor. ZIP64 records appear exactly when a 64-bit field crosses
//! the escalation trigger.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;

use crate::codec::{self, CountingWriter, Encoder, METHOD_STORE};
use crate::context::EolMode;
use crate::crypto::{expected_check_byte, make_encryption_header, EncryptWriter, Keys};
use crate::entry::Entry;
use crate::error::{Result, ZuError};
use crate::fsio::COPY_CHUNK;
use crate::headers::{
    build_extended_timestamp_extra, build_unix_uid_gid_extra, build_zip64_extra,
    strip_attribute_extras, unix_to_dos, write_data_descriptor, CentralFileHeader,
    EndOfCentralDirectory, ExtraFieldIter, LocalFileHeader, Zip64EndOfCentralDirectory,
    Zip64EocdLocator, EXTRA_ZIP64, ENCRYPTION_HEADER_LEN, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED,
    HOST_UNIX, LOCAL_FILE_HEADER_LEN, ZIP64_ENTRY_SENTINEL, ZIP64_SENTINEL,
};

/// Per-entry parameters resolved by the orchestrator.
#[derive(Debug, Clone)]
pub struct EntryPlan {
    /// Archive name, forward slashes, no leading slash
    pub name: String,
    pub method: u16,
    pub level: u32,
    pub mtime_unix: i64,
    /// Full Unix st_mode bits, 0 when unknown
    pub mode: u32,
    /// Owner ids recorded in the uid/gid extra
    pub uid: u32,
    pub gid: u32,
    /// Skip the timestamp and uid/gid extras
    pub strip_extras: bool,
}

impl EntryPlan {
    fn dos_pair(&self) -> (u16, u16) {
        unix_to_dos(self.mtime_unix)
    }

    fn external_attrs(&self, dir: bool) -> u32 {
        let dos_bits = if dir { 0x10 } else { 0 };
        (self.mode << 16) | dos_bits
    }

    fn version_made_by(&self) -> u16 {
        ((HOST_UNIX as u16) << 8) | 20
    }
}

/// Streaming archive writer over any byte sink.
pub struct ArchiveWriter<W: Write> {
    sink: W,
    offset: u64,
    entries: Vec<Entry>,
    zip64_trigger: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W, zip64_trigger: u64) -> Self {
        ArchiveWriter {
            sink,
            offset: 0,
            entries: Vec::new(),
            zip64_trigger,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn last_entry(&self) -> Option<&Entry> {
        self.entries.last()
    }

    /// Add a regular file through the staged path: compress into the
    /// reusable buffer, measure, fall back to store when compression
    /// loses, then emit header and payload with final sizes.
    pub fn add_path_staged(
        &mut self,
        plan: &EntryPlan,
        path: &Path,
        stage: &mut Vec<u8>,
        password: Option<&[u8]>,
    ) -> Result<()> {
        let mut input = File::open(path)?;
        let mut crc = Crc32::new();
        let mut plain_size = 0u64;

        stage.clear();
        let mut method = plan.method;
        if method == METHOD_STORE {
            read_into(&mut input, stage, &mut crc, &mut plain_size)?;
        } else {
            let mut encoder = Encoder::new(method, plan.level, std::mem::take(stage))?;
            let mut buf = vec![0u8; COPY_CHUNK];
            loop {
                let got = input.read(&mut buf)?;
                if got == 0 {
                    break;
                }
                crc.update(&buf[..got]);
                plain_size += got as u64;
                encoder.write_all(&buf[..got])?;
            }
            *stage = encoder.finish()?;
            if stage.len() as u64 >= plain_size {
                // compression lost; rewind and take the bytes as-is
                method = METHOD_STORE;
                stage.clear();
                crc = Crc32::new();
                plain_size = 0;
                input.seek(SeekFrom::Start(0))?;
                read_into(&mut input, stage, &mut crc, &mut plain_size)?;
            }
        }

        self.emit_staged(plan, method, crc.finalize(), plain_size, stage, password)
    }

    /// Add an entry whose full plaintext is already in memory (symlink
    /// targets, staged stdin probes, tests).
    pub fn add_data_staged(
        &mut self,
        plan: &EntryPlan,
        data: &[u8],
        stage: &mut Vec<u8>,
        password: Option<&[u8]>,
    ) -> Result<()> {
        let crc = crc32fast::hash(data);
        let plain_size = data.len() as u64;
        stage.clear();
        let mut method = plan.method;
        if method != METHOD_STORE {
            let mut encoder = Encoder::new(method, plan.level, std::mem::take(stage))?;
            encoder.write_all(data)?;
            *stage = encoder.finish()?;
        }
        if method == METHOD_STORE || stage.len() as u64 >= plain_size {
            method = METHOD_STORE;
            stage.clear();
            stage.extend_from_slice(data);
        }
        self.emit_staged(plan, method, crc, plain_size, stage, password)
    }

    fn emit_staged(
        &mut self,
        plan: &EntryPlan,
        method: u16,
        crc32: u32,
        uncompressed_size: u64,
        payload: &[u8],
        password: Option<&[u8]>,
    ) -> Result<()> {
        let mut flags = 0u16;
        let mut compressed_size = payload.len() as u64;
        if password.is_some() {
            flags |= FLAG_ENCRYPTED;
            compressed_size += ENCRYPTION_HEADER_LEN as u64;
        }
        let (dos_date, dos_time) = plan.dos_pair();

        let mut entry = Entry {
            name_raw: plan.name.clone().into_bytes(),
            name: plan.name.clone(),
            version_made_by: plan.version_made_by(),
            flags,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            external_attrs: plan.external_attrs(plan.name.ends_with('/')),
            local_header_offset: self.offset,
            extra: self.regular_extras(plan),
            ..Default::default()
        };
        entry.version_needed =
            codec::version_needed_for(method, entry.needs_zip64(self.zip64_trigger));

        self.write_local_header(&entry)?;
        if let Some(password) = password {
            let mut keys = Keys::new(password);
            let check = expected_check_byte(flags, crc32, dos_time);
            let header = make_encryption_header(&mut keys, check)?;
            self.sink.write_all(&header)?;
            self.offset += header.len() as u64;
            let mut writer = EncryptWriter::new(&mut self.sink, keys);
            writer.write_all(payload)?;
        } else {
            self.sink.write_all(payload)?;
        }
        self.offset += payload.len() as u64;
        self.entries.push(entry);
        Ok(())
    }

    /// Add an entry from a non-seekable source: local header first with
    /// flag bit 3 and zero sizes, payload streamed through the encoder,
    /// data descriptor last.
    pub fn add_stream(
        &mut self,
        plan: &EntryPlan,
        source: &mut dyn Read,
        translate: Option<EolMode>,
        password: Option<&[u8]>,
    ) -> Result<()> {
        let mut flags = FLAG_DATA_DESCRIPTOR;
        if password.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        let (dos_date, dos_time) = plan.dos_pair();

        let mut entry = Entry {
            name_raw: plan.name.clone().into_bytes(),
            name: plan.name.clone(),
            version_made_by: plan.version_made_by(),
            version_needed: codec::version_needed_for(plan.method, false),
            flags,
            method: plan.method,
            dos_time,
            dos_date,
            external_attrs: plan.external_attrs(false),
            local_header_offset: self.offset,
            extra: self.regular_extras(plan),
            ..Default::default()
        };
        self.write_local_header(&entry)?;

        let mut encrypted_header = 0u64;
        let mut keys = None;
        if let Some(password) = password {
            let mut k = Keys::new(password);
            let check = expected_check_byte(flags, 0, dos_time);
            let header = make_encryption_header(&mut k, check)?;
            self.sink.write_all(&header)?;
            encrypted_header = ENCRYPTION_HEADER_LEN as u64;
            keys = Some(k);
        }

        let mut reader: Box<dyn Read + '_> = match translate {
            Some(mode) => Box::new(EolReader::new(source, mode)),
            None => Box::new(source),
        };

        let counting = CountingWriter::new(&mut self.sink);
        let mut crc = Crc32::new();
        let mut plain_size = 0u64;
        let compressed = match keys {
            Some(keys) => {
                let mut encoder = Encoder::new(
                    plan.method,
                    plan.level,
                    EncryptWriter::new(counting, keys),
                )?;
                pump(&mut reader, &mut encoder, &mut crc, &mut plain_size)?;
                encoder.finish()?.into_inner().written()
            }
            None => {
                let mut encoder = Encoder::new(plan.method, plan.level, counting)?;
                pump(&mut reader, &mut encoder, &mut crc, &mut plain_size)?;
                encoder.finish()?.written()
            }
        };
        drop(reader);

        entry.crc32 = crc.finalize();
        entry.compressed_size = compressed + encrypted_header;
        entry.uncompressed_size = plain_size;
        self.offset += entry.compressed_size;

        let zip64 = entry.needs_zip64(self.zip64_trigger);
        if zip64 {
            entry.version_needed = codec::version_needed_for(entry.method, true);
        }
        let written = write_data_descriptor(
            &mut self.sink,
            entry.crc32,
            entry.compressed_size,
            entry.uncompressed_size,
            zip64,
        )?;
        self.offset += written as u64;
        self.entries.push(entry);
        Ok(())
    }

    /// Add a directory entry (name must end with `/`).
    pub fn add_directory(&mut self, plan: &EntryPlan) -> Result<()> {
        let (dos_date, dos_time) = plan.dos_pair();
        let entry = Entry {
            name_raw: plan.name.clone().into_bytes(),
            name: plan.name.clone(),
            version_made_by: plan.version_made_by(),
            version_needed: 20,
            method: METHOD_STORE,
            dos_time,
            dos_date,
            external_attrs: plan.external_attrs(true),
            local_header_offset: self.offset,
            extra: self.regular_extras(plan),
            ..Default::default()
        };
        self.write_local_header(&entry)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Carry an existing entry over byte-for-byte from the old archive:
    /// local header, name, extra and compressed payload, without
    /// re-compression. With `strip`, attribute extras are filtered out of
    /// the local header and its length patched to match.
    pub fn copy_entry_from<R: Read + Seek>(
        &mut self,
        src: &mut R,
        entry: &Entry,
        strip: bool,
        copy_buf: &mut Vec<u8>,
    ) -> Result<()> {
        src.seek(SeekFrom::Start(entry.local_header_offset))?;
        let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN];
        src.read_exact(&mut fixed)?;
        let mut local = LocalFileHeader::parse(&fixed)?;
        if local.name_len as usize != entry.name_raw.len() {
            return Err(ZuError::invalid_data(format!(
                "local header name mismatch for {}",
                entry.name
            )));
        }
        let mut name = vec![0u8; local.name_len as usize];
        src.read_exact(&mut name)?;
        let mut extra = vec![0u8; local.extra_len as usize];
        src.read_exact(&mut extra)?;
        if strip {
            extra = strip_attribute_extras(&extra);
            local.extra_len = extra.len() as u16;
        }

        let new_offset = self.offset;
        local.write(&mut self.sink)?;
        self.sink.write_all(&name)?;
        self.sink.write_all(&extra)?;
        self.offset += LOCAL_FILE_HEADER_LEN as u64 + name.len() as u64 + extra.len() as u64;

        crate::fsio::copy_range(src, &mut self.sink, entry.compressed_size, copy_buf)?;
        self.offset += entry.compressed_size;

        if entry.has_data_descriptor() {
            self.copy_descriptor(src, entry)?;
        }

        let mut carried = entry.clone();
        carried.local_header_offset = new_offset;
        carried.extra = if strip {
            strip_attribute_extras(&without_zip64(&entry.extra))
        } else {
            without_zip64(&entry.extra)
        };
        carried.state = Default::default();
        self.entries.push(carried);
        Ok(())
    }

    fn copy_descriptor<R: Read + Seek>(&mut self, src: &mut R, entry: &Entry) -> Result<()> {
        // The 16- and 24-byte forms are told apart by matching the size
        // fields against the central record.
        let mut buf = [0u8; 24];
        let mut have = 0usize;
        while have < buf.len() {
            let got = src.read(&mut buf[have..])?;
            if got == 0 {
                break;
            }
            have += got;
        }
        if have < 16 {
            return Err(ZuError::invalid_data(format!(
                "truncated data descriptor for {}",
                entry.name
            )));
        }
        let comp32 = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as u64;
        let uncomp32 = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as u64;
        let narrow_matches = comp32 == entry.compressed_size & 0xFFFF_FFFF
            && uncomp32 == entry.uncompressed_size & 0xFFFF_FFFF;
        let len = if narrow_matches && entry.compressed_size <= ZIP64_SENTINEL as u64 {
            16
        } else {
            24
        };
        if have < len {
            return Err(ZuError::invalid_data(format!(
                "truncated data descriptor for {}",
                entry.name
            )));
        }
        self.sink.write_all(&buf[..len])?;
        self.offset += len as u64;
        Ok(())
    }

    /// Timestamp and ownership extras for freshly-built entries.
    fn regular_extras(&self, plan: &EntryPlan) -> Vec<u8> {
        if plan.strip_extras {
            return Vec::new();
        }
        let mut extra = build_extended_timestamp_extra(plan.mtime_unix);
        extra.extend_from_slice(&build_unix_uid_gid_extra(plan.uid, plan.gid));
        extra
    }

    fn write_local_header(&mut self, entry: &Entry) -> Result<()> {
        let zip64 = entry.needs_zip64(self.zip64_trigger);
        let (comp32, uncomp32, zip64_extra) = if zip64 {
            (
                ZIP64_SENTINEL,
                ZIP64_SENTINEL,
                build_zip64_extra(
                    Some(entry.uncompressed_size),
                    Some(entry.compressed_size),
                    None,
                ),
            )
        } else {
            (
                entry.compressed_size as u32,
                entry.uncompressed_size as u32,
                Vec::new(),
            )
        };
        let extra_len = (entry.extra.len() + zip64_extra.len()) as u16;
        let header = LocalFileHeader {
            version_needed: entry.version_needed,
            flags: entry.flags,
            method: entry.method,
            dos_time: entry.dos_time,
            dos_date: entry.dos_date,
            crc32: entry.crc32,
            compressed_size: comp32,
            uncompressed_size: uncomp32,
            name_len: entry.name_raw.len() as u16,
            extra_len,
        };
        header.write(&mut self.sink)?;
        self.sink.write_all(&entry.name_raw)?;
        self.sink.write_all(&zip64_extra)?;
        self.sink.write_all(&entry.extra)?;
        self.offset +=
            LOCAL_FILE_HEADER_LEN as u64 + entry.name_raw.len() as u64 + extra_len as u64;
        Ok(())
    }

    /// Emit the central directory, ZIP64 records when escalated, and the
    /// classic EOCD with the archive comment. Returns the sink.
    pub fn finish(mut self, comment: &[u8]) -> Result<W> {
        let cd_offset = self.offset;
        let trigger = self.zip64_trigger;
        let mut any_zip64_entry = false;

        for entry in &self.entries {
            let uncomp_sentinel = entry.uncompressed_size >= trigger;
            let comp_sentinel = entry.compressed_size >= trigger;
            let offset_sentinel = entry.local_header_offset >= trigger;
            let zip64_extra = build_zip64_extra(
                uncomp_sentinel.then_some(entry.uncompressed_size),
                comp_sentinel.then_some(entry.compressed_size),
                offset_sentinel.then_some(entry.local_header_offset),
            );
            any_zip64_entry |= !zip64_extra.is_empty();

            let extra_len = (zip64_extra.len() + entry.extra.len()) as u16;
            let header = CentralFileHeader {
                version_made_by: entry.version_made_by,
                version_needed: entry.version_needed,
                flags: entry.flags,
                method: entry.method,
                dos_time: entry.dos_time,
                dos_date: entry.dos_date,
                crc32: entry.crc32,
                compressed_size: if comp_sentinel {
                    ZIP64_SENTINEL
                } else {
                    entry.compressed_size as u32
                },
                uncompressed_size: if uncomp_sentinel {
                    ZIP64_SENTINEL
                } else {
                    entry.uncompressed_size as u32
                },
                name_len: entry.name_raw.len() as u16,
                extra_len,
                comment_len: entry.comment.len() as u16,
                disk_start: 0,
                internal_attrs: entry.internal_attrs,
                external_attrs: entry.external_attrs,
                local_header_offset: if offset_sentinel {
                    ZIP64_SENTINEL
                } else {
                    entry.local_header_offset as u32
                },
            };
            header.write(&mut self.sink)?;
            self.sink.write_all(&entry.name_raw)?;
            self.sink.write_all(&zip64_extra)?;
            self.sink.write_all(&entry.extra)?;
            self.sink.write_all(&entry.comment)?;
            self.offset += CENTRAL_FILE_HEADER_LEN_U64
                + entry.name_raw.len() as u64
                + extra_len as u64
                + entry.comment.len() as u64;
        }

        let cd_size = self.offset - cd_offset;
        let escalate = self.entries.len() > ZIP64_ENTRY_SENTINEL as usize
            || cd_offset >= trigger
            || cd_size >= trigger
            || any_zip64_entry;

        if escalate {
            let zip64_eocd_offset = self.offset;
            Zip64EndOfCentralDirectory {
                version_made_by: ((HOST_UNIX as u16) << 8) | 45,
                version_needed: 45,
                disk_number: 0,
                cd_disk: 0,
                entries_on_disk: self.entries.len() as u64,
                entries_total: self.entries.len() as u64,
                cd_size,
                cd_offset,
            }
            .write(&mut self.sink)?;
            self.offset += crate::headers::ZIP64_EOCD_LEN as u64;
            Zip64EocdLocator {
                eocd_disk: 0,
                eocd_offset: zip64_eocd_offset,
                disk_total: 1,
            }
            .write(&mut self.sink)?;
            self.offset += crate::headers::ZIP64_EOCD_LOCATOR_LEN as u64;
        }

        let entries16 = if self.entries.len() > ZIP64_ENTRY_SENTINEL as usize {
            ZIP64_ENTRY_SENTINEL
        } else {
            self.entries.len() as u16
        };
        EndOfCentralDirectory {
            disk_number: 0,
            cd_disk: 0,
            entries_on_disk: entries16,
            entries_total: entries16,
            cd_size: if cd_size >= trigger {
                ZIP64_SENTINEL
            } else {
                cd_size as u32
            },
            cd_offset: if cd_offset >= trigger {
                ZIP64_SENTINEL
            } else {
                cd_offset as u32
            },
            comment_len: comment.len() as u16,
        }
        .write(&mut self.sink)?;
        self.sink.write_all(comment)?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

const CENTRAL_FILE_HEADER_LEN_U64: u64 = crate::headers::CENTRAL_FILE_HEADER_LEN as u64;

/// Pick the effective method for an input before any data is read:
/// level 0, empty files and no-compress suffixes all force store.
pub fn choose_method(requested: u16, level: u32, name: &str, size: u64, suffixes: &[String]) -> u16 {
    if level == 0 || size == 0 {
        return METHOD_STORE;
    }
    let lower = name.to_ascii_lowercase();
    if suffixes
        .iter()
        .any(|s| lower.ends_with(&s.to_ascii_lowercase()))
    {
        return METHOD_STORE;
    }
    requested
}

/// Strip the ZIP64 block out of a stored extra field; the writer always
/// rebuilds it against the entry's final offset.
fn without_zip64(extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    for (tag, data) in ExtraFieldIter::new(extra) {
        if tag == EXTRA_ZIP64 {
            continue;
        }
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

fn read_into(
    input: &mut File,
    stage: &mut Vec<u8>,
    crc: &mut Crc32,
    plain_size: &mut u64,
) -> Result<()> {
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let got = input.read(&mut buf)?;
        if got == 0 {
            return Ok(());
        }
        crc.update(&buf[..got]);
        *plain_size += got as u64;
        stage
            .try_reserve(got)
            .map_err(|_| ZuError::OutOfMemory)?;
        stage.extend_from_slice(&buf[..got]);
    }
}

fn pump(
    reader: &mut dyn Read,
    encoder: &mut dyn Write,
    crc: &mut Crc32,
    plain_size: &mut u64,
) -> Result<()> {
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let got = reader.read(&mut buf)?;
        if got == 0 {
            return Ok(());
        }
        crc.update(&buf[..got]);
        *plain_size += got as u64;
        encoder.write_all(&buf[..got])?;
    }
}

/// Line-ending translating reader applied to probable text inputs
/// before CRC and compression.
pub struct EolReader<'a> {
    inner: &'a mut dyn Read,
    mode: EolMode,
    out: Vec<u8>,
    out_pos: usize,
    /// CrLfToLf: a CR at a chunk boundary waits for the next byte
    held_cr: bool,
    /// LfToCrLf: whether the previous input byte was a CR
    last_was_cr: bool,
    done: bool,
}

impl<'a> EolReader<'a> {
    pub fn new(inner: &'a mut dyn Read, mode: EolMode) -> Self {
        EolReader {
            inner,
            mode,
            out: Vec::new(),
            out_pos: 0,
            held_cr: false,
            last_was_cr: false,
            done: false,
        }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        let mut buf = [0u8; 8192];
        self.out.clear();
        self.out_pos = 0;
        let got = self.inner.read(&mut buf)?;
        if got == 0 {
            if self.held_cr {
                self.out.push(b'\r');
                self.held_cr = false;
            }
            self.done = true;
            return Ok(());
        }
        match self.mode {
            EolMode::CrLfToLf => {
                for &b in &buf[..got] {
                    if self.held_cr {
                        self.held_cr = false;
                        if b != b'\n' {
                            self.out.push(b'\r');
                        }
                    }
                    if b == b'\r' {
                        self.held_cr = true;
                    } else {
                        self.out.push(b);
                    }
                }
            }
            EolMode::LfToCrLf => {
                for &b in &buf[..got] {
                    if b == b'\n' && !self.last_was_cr {
                        self.out.push(b'\r');
                    }
                    self.last_was_cr = b == b'\r';
                    self.out.push(b);
                }
            }
        }
        Ok(())
    }
}

impl<'a> Read for EolReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.out_pos >= self.out.len() {
            if self.done {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = (self.out.len() - self.out_pos).min(buf.len());
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}
