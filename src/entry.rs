//! In-memory central-directory entry
//!
//! Entries come from parsing an existing archive or from the writer after
//! a successful emission. During a modify run each existing entry moves
//! through a small state machine: kept, changed (re-materialized from the
//! filesystem), or removed (skipped at emission time).

use crate::codec::METHOD_STORE;
use crate::headers::{
    dos_to_unix, parse_extended_timestamp, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED, FLAG_UTF8_NAME,
    HOST_UNIX,
};

/// Modify-run fate of an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryState {
    /// Carried over byte-for-byte from the old archive
    #[default]
    Kept,
    /// Replaced by a fresh input; old bytes are not copied
    Changed,
    /// Skipped during emission
    Removed,
}

/// One archive entry as described by the central directory.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Stored name bytes, verbatim
    pub name_raw: Vec<u8>,
    /// Lossy decoding of the name for matching and display
    pub name: String,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u64,
    /// Central-directory extra field as stored
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub state: EntryState,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn is_utf8_name(&self) -> bool {
        self.flags & FLAG_UTF8_NAME != 0
    }

    pub fn host(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    /// Unix permission bits from the upper half of the external
    /// attributes, present only for Unix-hosted entries.
    pub fn unix_mode(&self) -> Option<u32> {
        if self.host() != HOST_UNIX {
            return None;
        }
        let mode = self.external_attrs >> 16;
        if mode == 0 {
            None
        } else {
            Some(mode)
        }
    }

    /// True when the entry stores a symbolic link target.
    pub fn is_symlink(&self) -> bool {
        self.unix_mode()
            .map(|m| m & 0o170000 == 0o120000)
            .unwrap_or(false)
    }

    /// Modification time in Unix seconds; the extended-timestamp extra
    /// wins over the 2-second DOS pair when present.
    pub fn mtime_unix(&self) -> i64 {
        parse_extended_timestamp(&self.extra)
            .unwrap_or_else(|| dos_to_unix(self.dos_date, self.dos_time))
    }

    /// Whether any field of this entry forces ZIP64 treatment under the
    /// given escalation trigger.
    pub fn needs_zip64(&self, trigger: u64) -> bool {
        self.uncompressed_size >= trigger
            || self.compressed_size >= trigger
            || self.local_header_offset >= trigger
    }

    /// Compression ratio percentage for progress lines.
    pub fn ratio_percent(&self) -> u32 {
        if self.uncompressed_size == 0 || self.method == METHOD_STORE {
            return 0;
        }
        let saved = self
            .uncompressed_size
            .saturating_sub(self.compressed_size);
        ((saved * 100 + self.uncompressed_size / 2) / self.uncompressed_size) as u32
    }
}
