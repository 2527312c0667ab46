//! Run context owned by the orchestrators
//!
//! One mutable value parameterizes a whole run: paths, selection
//! patterns, mode toggles, policy bits, and the reusable buffers and
//! entry lists the orchestrators fill in as they go.

use std::path::PathBuf;

use crate::entry::Entry;
use crate::fsio::InputInfo;
use crate::headers::ZIP64_SENTINEL;

/// Environment override for the ZIP64 escalation trigger, decimal bytes.
pub const ZIP64_TRIGGER_ENV: &str = "ZU_TEST_ZIP64_TRIGGER";

/// Archiver operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Add inputs, replacing same-named entries
    #[default]
    Add,
    /// Add or replace only when the input is newer
    Update,
    /// Replace only existing entries, and only when newer
    Freshen,
    /// Mirror the filesystem: replace on mtime/size drift, drop entries
    /// whose path no longer exists
    Filesync,
    /// Remove entries matching the argument patterns
    Delete,
    /// Copy selected entries from the source archive to a new one
    Copy,
}

/// Archive repair level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixLevel {
    #[default]
    None,
    /// Trust the central directory, rewrite the archive around it
    Fix,
    /// Ignore the central directory, rebuild it from a local-header scan
    FixFix,
}

/// Line-ending translation applied to probable text inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolMode {
    /// LF to CRLF on the way in
    LfToCrLf,
    /// CRLF to LF on the way in
    CrLfToLf,
}

/// Everything a run needs, owned in one place.
#[derive(Debug)]
pub struct ZuContext {
    pub archive_path: PathBuf,
    /// Explicit output path; default is an atomic replace of the archive
    pub out_path: Option<PathBuf>,
    /// Directory for the temporary output; default is the archive's own
    pub temp_dir: Option<PathBuf>,
    /// Extraction root for the reader side
    pub dest_dir: PathBuf,
    pub mode: RunMode,
    pub fix: FixLevel,
    /// Input paths (or patterns, for delete/copy modes)
    pub input_paths: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Suffixes never worth compressing
    pub no_compress_suffixes: Vec<String>,
    pub method: u16,
    pub level: u32,
    pub recurse: bool,
    pub junk_paths: bool,
    pub overwrite: bool,
    pub case_insensitive: bool,
    /// Store symlinks as links instead of following them
    pub store_symlinks: bool,
    pub translate_eol: Option<EolMode>,
    /// Strip attribute extras (extended timestamp, uid/gid) on write and
    /// carry-over
    pub strip_extras: bool,
    pub password: Option<Vec<u8>>,
    /// Only touch entries/inputs modified at or after this time
    pub time_after: Option<i64>,
    /// ...and strictly before this one
    pub time_before: Option<i64>,
    /// Replacement archive comment, when requested
    pub comment: Option<Vec<u8>>,
    /// Set the rewritten archive's mtime to its newest entry
    pub archive_mtime_latest: bool,
    pub dry_run: bool,
    /// 0 = normal, 1 = quiet, 2 = silent
    pub quiet: u8,
    pub verbose: bool,
    /// Extract to stdout instead of the filesystem
    pub to_stdout: bool,
    /// Test-only decode, nothing written
    pub test_only: bool,
    /// ZIP64 escalation trigger for size/offset fields
    pub zip64_trigger: u64,

    // Owned run state
    pub stage_buf: Vec<u8>,
    pub copy_buf: Vec<u8>,
    pub existing: Vec<Entry>,
    pub inputs: Vec<InputInfo>,
}

impl ZuContext {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        ZuContext {
            archive_path: archive_path.into(),
            out_path: None,
            temp_dir: None,
            dest_dir: PathBuf::from("."),
            mode: RunMode::default(),
            fix: FixLevel::default(),
            input_paths: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            no_compress_suffixes: default_no_compress_suffixes(),
            method: crate::codec::METHOD_DEFLATE,
            level: 6,
            recurse: false,
            junk_paths: false,
            overwrite: false,
            case_insensitive: false,
            store_symlinks: false,
            translate_eol: None,
            strip_extras: false,
            password: None,
            time_after: None,
            time_before: None,
            comment: None,
            archive_mtime_latest: false,
            dry_run: false,
            quiet: 0,
            verbose: false,
            to_stdout: false,
            test_only: false,
            zip64_trigger: zip64_trigger_from_env(),
            stage_buf: Vec::new(),
            copy_buf: Vec::new(),
            existing: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Does `mtime` pass the configured time window?
    pub fn within_time_window(&self, mtime_unix: i64) -> bool {
        if let Some(after) = self.time_after {
            if mtime_unix < after {
                return false;
            }
        }
        if let Some(before) = self.time_before {
            if mtime_unix >= before {
                return false;
            }
        }
        true
    }
}

/// Suffixes stored uncompressed by default: already-compressed formats
/// where deflate only burns time.
pub fn default_no_compress_suffixes() -> Vec<String> {
    [
        ".zip", ".gz", ".tgz", ".bz2", ".xz", ".zst", ".7z", ".rar", ".jpg", ".jpeg", ".png",
        ".gif", ".webp", ".mp3", ".mp4", ".ogg", ".woff", ".woff2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The ZIP64 trigger: the 32-bit sentinel unless the test hook lowers it.
pub fn zip64_trigger_from_env() -> u64 {
    std::env::var(ZIP64_TRIGGER_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(ZIP64_SENTINEL as u64)
}
