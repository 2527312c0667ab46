//! Error and status taxonomy shared by both tools

use std::io;

/// Longest user-visible message; longer texts are truncated at a char boundary.
pub const MAX_MESSAGE_LEN: usize = 255;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ZuError>;

/// Coarse status classes. The binaries map these to process exit codes;
/// the engine only ever sets the kind at the point of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Usage,
    Io,
    Oom,
    NoFiles,
    NotImplemented,
    PasswordRequired,
    BadPassword,
}

impl StatusKind {
    /// Exit code when returned from the archiver (`zu`).
    pub fn writer_exit_code(self) -> i32 {
        match self {
            StatusKind::Ok => 0,
            StatusKind::Io => 2,
            StatusKind::NotImplemented => 3,
            StatusKind::Oom => 5,
            StatusKind::NoFiles => 12,
            StatusKind::Usage => 16,
            StatusKind::PasswordRequired | StatusKind::BadPassword => 16,
        }
    }

    /// Exit code when returned from the extractor (`unzu`).
    pub fn reader_exit_code(self) -> i32 {
        match self {
            StatusKind::Ok => 0,
            StatusKind::Io => 2,
            StatusKind::NotImplemented => 3,
            StatusKind::Oom => 5,
            StatusKind::Usage => 10,
            StatusKind::NoFiles => 11,
            StatusKind::PasswordRequired => 81,
            StatusKind::BadPassword => 82,
        }
    }
}

/// Error type carried through every archive operation
#[derive(Debug)]
pub enum ZuError {
    /// I/O failure: short read or write, missing file, failed rename,
    /// missing end-of-central-directory, integrity mismatch
    Io(io::Error),
    /// Caller misuse, invalid archive path, or archive structure too
    /// broken to trust without an explicit repair request
    Usage(String),
    /// A staging buffer could not grow
    OutOfMemory,
    /// Selection produced no entries, or a modify run had nothing to do
    NoFiles(String),
    /// Compression method or request outside the supported set
    NotImplemented(String),
    /// Entry is encrypted and no password was supplied
    PasswordRequired,
    /// Supplied password failed the entry's check byte
    BadPassword,
}

impl ZuError {
    pub fn kind(&self) -> StatusKind {
        match self {
            ZuError::Io(_) => StatusKind::Io,
            ZuError::Usage(_) => StatusKind::Usage,
            ZuError::OutOfMemory => StatusKind::Oom,
            ZuError::NoFiles(_) => StatusKind::NoFiles,
            ZuError::NotImplemented(_) => StatusKind::NotImplemented,
            ZuError::PasswordRequired => StatusKind::PasswordRequired,
            ZuError::BadPassword => StatusKind::BadPassword,
        }
    }

    /// Shorthand for integrity/format failures surfaced as I/O errors.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        ZuError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
    }
}

/// Truncate a message to [`MAX_MESSAGE_LEN`] bytes on a char boundary.
pub fn clip_message(msg: &str) -> &str {
    if msg.len() <= MAX_MESSAGE_LEN {
        return msg;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}

impl std::fmt::Display for ZuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ZuError::Io(e) => format!("I/O error: {}", e),
            ZuError::Usage(msg) => msg.clone(),
            ZuError::OutOfMemory => "out of memory".to_string(),
            ZuError::NoFiles(msg) => msg.clone(),
            ZuError::NotImplemented(msg) => format!("not supported: {}", msg),
            ZuError::PasswordRequired => "password required".to_string(),
            ZuError::BadPassword => "incorrect password".to_string(),
        };
        f.write_str(clip_message(&text))
    }
}

impl std::error::Error for ZuError {}

impl From<io::Error> for ZuError {
    fn from(err: io::Error) -> Self {
        ZuError::Io(err)
    }
}
