//! Central-directory recovery by local-header scan
//!
//! When the EOCD or central directory is gone, the archive body still
//! carries one local header per entry. The scanner sweeps the file for
//! the local-header signature and synthesizes central entries from what
//! it finds. Sizes hidden behind data descriptors are estimated from the
//! gap to the next header; a signature byte pattern inside compressed
//! data can fool this, which is inherent to the approach.

use std::io::{Read, Seek, SeekFrom};

use crate::entry::Entry;
use crate::error::{Result, ZuError};
use crate::headers::{
    parse_zip64_extra, LocalFileHeader, DATA_DESCRIPTOR_LEN, DATA_DESCRIPTOR_LEN_ZIP64,
    DATA_DESCRIPTOR_SIGNATURE, FLAG_DATA_DESCRIPTOR, LOCAL_FILE_HEADER_LEN,
    LOCAL_FILE_HEADER_SIGNATURE, ZIP64_SENTINEL,
};

/// Scan result: synthesized entries plus the names whose compressed size
/// had to be estimated.
#[derive(Debug, Default)]
pub struct Recovered {
    pub entries: Vec<Entry>,
    pub estimated: Vec<String>,
}

struct Candidate {
    entry: Entry,
    data_start: u64,
    size_known: bool,
    zip64: bool,
}

/// Sweep the file and synthesize a central directory.
pub fn scan<F: Read + Seek>(file: &mut F) -> Result<Recovered> {
    let file_size = file.seek(SeekFrom::End(0))?;
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut pos = 0u64;

    while let Some(offset) = find_local_signature(file, pos, file_size)? {
        match parse_candidate(file, offset, file_size)? {
            Some(candidate) => {
                pos = if candidate.size_known {
                    candidate.data_start + candidate.entry.compressed_size
                } else {
                    candidate.data_start
                };
                candidates.push(candidate);
            }
            // implausible header: a stray signature pattern; step past it
            None => pos = offset + 4,
        }
    }

    if candidates.is_empty() {
        return Err(ZuError::invalid_data("no local file headers found"));
    }

    // Close the unknown sizes against the following header (or EOF).
    let mut recovered = Recovered::default();
    for i in 0..candidates.len() {
        let next_offset = candidates
            .get(i + 1)
            .map(|c| c.entry.local_header_offset)
            .unwrap_or(file_size);
        let c = &mut candidates[i];
        if !c.size_known {
            let descriptor_len = if c.entry.flags & FLAG_DATA_DESCRIPTOR != 0 {
                if c.zip64 {
                    DATA_DESCRIPTOR_LEN_ZIP64 as u64
                } else {
                    DATA_DESCRIPTOR_LEN as u64
                }
            } else {
                0
            };
            let gap = next_offset.saturating_sub(c.data_start);
            c.entry.compressed_size = gap.saturating_sub(descriptor_len);
            // the descriptor, when really there, has the CRC and sizes
            // the local header lacked
            read_descriptor(file, c)?;
            recovered.estimated.push(c.entry.name.clone());
        }
    }

    recovered.entries = candidates.into_iter().map(|c| c.entry).collect();
    Ok(recovered)
}

/// Parse the header at `offset` into a candidate, or None when it is
/// clearly a false positive.
fn parse_candidate<F: Read + Seek>(
    file: &mut F,
    offset: u64,
    file_size: u64,
) -> Result<Option<Candidate>> {
    if offset + LOCAL_FILE_HEADER_LEN as u64 > file_size {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN];
    file.read_exact(&mut fixed)?;
    let header = LocalFileHeader::parse(&fixed)?;

    let name_len = header.name_len as u64;
    let extra_len = header.extra_len as u64;
    if name_len == 0 || offset + LOCAL_FILE_HEADER_LEN as u64 + name_len + extra_len > file_size {
        return Ok(None);
    }

    let mut name_raw = vec![0u8; header.name_len as usize];
    file.read_exact(&mut name_raw)?;
    if name_raw.contains(&0) {
        return Ok(None);
    }
    let mut extra = vec![0u8; header.extra_len as usize];
    file.read_exact(&mut extra)?;

    let uncomp_sentinel = header.uncompressed_size == ZIP64_SENTINEL;
    let comp_sentinel = header.compressed_size == ZIP64_SENTINEL;
    let zip64_values = parse_zip64_extra(&extra, uncomp_sentinel, comp_sentinel, false);
    let zip64 = zip64_values.uncompressed_size.is_some() || zip64_values.compressed_size.is_some();

    let compressed_size = zip64_values
        .compressed_size
        .unwrap_or(header.compressed_size as u64);
    let uncompressed_size = zip64_values
        .uncompressed_size
        .unwrap_or(header.uncompressed_size as u64);

    let streaming = header.flags & FLAG_DATA_DESCRIPTOR != 0;
    let size_known = !streaming && (!comp_sentinel || zip64_values.compressed_size.is_some());

    let data_start = offset + LOCAL_FILE_HEADER_LEN as u64 + name_len + extra_len;
    let name = String::from_utf8_lossy(&name_raw).into_owned();
    Ok(Some(Candidate {
        entry: Entry {
            name,
            name_raw,
            version_needed: header.version_needed,
            flags: header.flags,
            method: header.method,
            dos_time: header.dos_time,
            dos_date: header.dos_date,
            crc32: header.crc32,
            compressed_size: if size_known { compressed_size } else { 0 },
            uncompressed_size,
            local_header_offset: offset,
            version_made_by: 20,
            ..Default::default()
        },
        data_start,
        size_known,
        zip64,
    }))
}

/// Try to lift CRC and sizes out of the data descriptor trailing an
/// estimated entry.
fn read_descriptor<F: Read + Seek>(file: &mut F, c: &mut Candidate) -> Result<()> {
    if c.entry.flags & FLAG_DATA_DESCRIPTOR == 0 {
        return Ok(());
    }
    let at = c.data_start + c.entry.compressed_size;
    file.seek(SeekFrom::Start(at))?;
    let mut buf = [0u8; DATA_DESCRIPTOR_LEN_ZIP64];
    let want = if c.zip64 {
        DATA_DESCRIPTOR_LEN_ZIP64
    } else {
        DATA_DESCRIPTOR_LEN
    };
    if file.read_exact(&mut buf[..want]).is_err() {
        return Ok(());
    }
    if u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) != DATA_DESCRIPTOR_SIGNATURE {
        return Ok(());
    }
    c.entry.crc32 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if c.zip64 {
        let mut eight = [0u8; 8];
        eight.copy_from_slice(&buf[8..16]);
        c.entry.compressed_size = u64::from_le_bytes(eight);
        eight.copy_from_slice(&buf[16..24]);
        c.entry.uncompressed_size = u64::from_le_bytes(eight);
    } else {
        c.entry.compressed_size =
            u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as u64;
        c.entry.uncompressed_size =
            u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as u64;
    }
    Ok(())
}

/// Find the next local-header signature at or after `from`.
fn find_local_signature<F: Read + Seek>(
    file: &mut F,
    from: u64,
    file_size: u64,
) -> Result<Option<u64>> {
    const CHUNK: usize = 128 * 1024;
    let sig = LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes();
    let mut pos = from;
    let mut buf = vec![0u8; CHUNK];
    while pos + 4 <= file_size {
        let want = CHUNK.min((file_size - pos) as usize);
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..want])?;
        if want >= 4 {
            for i in 0..=want - 4 {
                if buf[i..i + 4] == sig {
                    return Ok(Some(pos + i as u64));
                }
            }
        }
        if want < CHUNK {
            break;
        }
        // overlap so a signature split across chunks is still seen
        pos += (want - 3) as u64;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::build_zip64_extra;
    use std::io::{Cursor, Write};

    fn stored_entry(name: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        LocalFileHeader {
            version_needed: 20,
            method: 0,
            crc32: crc32fast::hash(data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name_len: name.len() as u16,
            ..Default::default()
        }
        .write(&mut buf)
        .unwrap();
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn recovers_plain_stored_entries() {
        let mut data = stored_entry("one.txt", b"first");
        data.extend_from_slice(&stored_entry("two.txt", b"second!"));
        let recovered = scan(&mut Cursor::new(data)).unwrap();
        assert_eq!(recovered.entries.len(), 2);
        assert_eq!(recovered.entries[0].name, "one.txt");
        assert_eq!(recovered.entries[0].compressed_size, 5);
        assert_eq!(recovered.entries[1].name, "two.txt");
        assert!(recovered.estimated.is_empty());
    }

    #[test]
    fn honors_zip64_extra_with_sentinel_sizes() {
        // a 100-byte stored entry whose 32-bit sizes are sentinels,
        // carried by a ZIP64 extra instead
        let payload = vec![0x5Au8; 100];
        let extra = build_zip64_extra(Some(100), Some(100), None);
        let mut buf = Vec::new();
        LocalFileHeader {
            version_needed: 45,
            method: 0,
            crc32: crc32fast::hash(&payload),
            compressed_size: ZIP64_SENTINEL,
            uncompressed_size: ZIP64_SENTINEL,
            name_len: 4,
            extra_len: extra.len() as u16,
            ..Default::default()
        }
        .write(&mut buf)
        .unwrap();
        buf.extend_from_slice(b"test");
        buf.extend_from_slice(&extra);
        buf.extend_from_slice(&payload);

        let recovered = scan(&mut Cursor::new(buf)).unwrap();
        assert_eq!(recovered.entries.len(), 1);
        assert_eq!(recovered.entries[0].compressed_size, 100);
        assert_eq!(recovered.entries[0].uncompressed_size, 100);
    }

    #[test]
    fn empty_input_recovers_nothing() {
        assert!(scan(&mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn descriptor_entry_size_comes_from_the_gap() {
        let data = b"streamed payload";
        let mut buf = Vec::new();
        LocalFileHeader {
            version_needed: 20,
            flags: FLAG_DATA_DESCRIPTOR,
            method: 0,
            name_len: 8,
            ..Default::default()
        }
        .write(&mut buf)
        .unwrap();
        buf.extend_from_slice(b"flow.bin");
        buf.extend_from_slice(data);
        crate::headers::write_data_descriptor(
            &mut buf,
            crc32fast::hash(data),
            data.len() as u64,
            data.len() as u64,
            false,
        )
        .unwrap();
        buf.extend_from_slice(&stored_entry("next.txt", b"x"));

        let recovered = scan(&mut Cursor::new(buf)).unwrap();
        assert_eq!(recovered.entries.len(), 2);
        assert_eq!(recovered.entries[0].compressed_size, data.len() as u64);
        assert_eq!(recovered.entries[0].crc32, crc32fast::hash(data));
        assert_eq!(recovered.estimated, vec!["flow.bin".to_string()]);
    }
}
