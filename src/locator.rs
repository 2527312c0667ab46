//! End-of-central-directory location and ZIP64 escalation
//!
//! The reader anchors on the classic EOCD found by scanning backward over
//! the archive tail. When any classic field carries the ZIP64 sentinel,
//! the ZIP64 locator sits immediately before the EOCD and points at the
//! ZIP64 record that holds the real 64-bit values.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, ZuError};
use crate::headers::{
    EndOfCentralDirectory, Zip64EndOfCentralDirectory, Zip64EocdLocator,
    END_OF_CENTRAL_DIRECTORY_LEN, END_OF_CENTRAL_DIRECTORY_SIGNATURE, ZIP64_ENTRY_SENTINEL,
    ZIP64_EOCD_LEN, ZIP64_EOCD_LOCATOR_LEN, ZIP64_SENTINEL,
};

/// Longest possible EOCD tail: a maximal comment plus the fixed record.
const MAX_EOCD_SEARCH: u64 = 0xFFFF + END_OF_CENTRAL_DIRECTORY_LEN as u64;

/// Resolved central-directory location.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub entries_total: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    /// Archive comment bytes from the EOCD tail
    pub comment: Vec<u8>,
    /// Absolute offset of the classic EOCD record
    pub eocd_offset: u64,
    /// Whether ZIP64 records were consulted
    pub zip64: bool,
}

/// Find and parse the EOCD (and ZIP64 records when escalated).
pub fn locate<F: Read + Seek>(file: &mut F) -> Result<Directory> {
    let file_size = file.seek(SeekFrom::End(0))?;
    let search_len = file_size.min(MAX_EOCD_SEARCH);
    let search_start = file_size - search_len;

    file.seek(SeekFrom::Start(search_start))?;
    let mut tail = vec![0u8; search_len as usize];
    file.read_exact(&mut tail)?;

    let sig = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    let mut eocd_pos = None;
    if tail.len() >= END_OF_CENTRAL_DIRECTORY_LEN {
        for i in (0..=tail.len() - END_OF_CENTRAL_DIRECTORY_LEN).rev() {
            if tail[i..i + 4] == sig {
                eocd_pos = Some(i);
                break;
            }
        }
    }
    let eocd_pos = eocd_pos.ok_or_else(|| {
        ZuError::invalid_data("end of central directory signature not found")
    })?;
    let eocd_offset = search_start + eocd_pos as u64;

    let eocd = EndOfCentralDirectory::parse(&tail[eocd_pos..])?;

    // Comment bytes trail the fixed record; a lying length field is
    // clamped to what is actually present.
    let comment_start = eocd_pos + END_OF_CENTRAL_DIRECTORY_LEN;
    let comment_end = (comment_start + eocd.comment_len as usize).min(tail.len());
    let comment = tail[comment_start..comment_end].to_vec();

    let mut dir = Directory {
        entries_total: eocd.entries_total as u64,
        cd_size: eocd.cd_size as u64,
        cd_offset: eocd.cd_offset as u64,
        comment,
        eocd_offset,
        zip64: false,
    };

    let escalated = eocd.entries_total == ZIP64_ENTRY_SENTINEL
        || eocd.cd_size == ZIP64_SENTINEL
        || eocd.cd_offset == ZIP64_SENTINEL;
    if !escalated {
        return Ok(dir);
    }

    // The locator sits immediately before the classic EOCD.
    if eocd_offset < ZIP64_EOCD_LOCATOR_LEN as u64 {
        return Err(ZuError::invalid_data("ZIP64 EOCD locator missing"));
    }
    file.seek(SeekFrom::Start(eocd_offset - ZIP64_EOCD_LOCATOR_LEN as u64))?;
    let mut locator_buf = [0u8; ZIP64_EOCD_LOCATOR_LEN];
    file.read_exact(&mut locator_buf)?;
    let locator = Zip64EocdLocator::parse(&locator_buf)?;

    file.seek(SeekFrom::Start(locator.eocd_offset))?;
    let mut zip64_buf = [0u8; ZIP64_EOCD_LEN];
    file.read_exact(&mut zip64_buf)?;
    let zip64 = Zip64EndOfCentralDirectory::parse(&zip64_buf)?;

    dir.entries_total = zip64.entries_total;
    dir.cd_size = zip64.cd_size;
    dir.cd_offset = zip64.cd_offset;
    dir.zip64 = true;
    Ok(dir)
}
