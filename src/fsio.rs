//! Filesystem adapters for both tools
//!
//! Thin wrappers over std that classify inputs, restore attributes,
//! perform the temp-file rename dance, and stage stdin into a seekable
//! scratch file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;

use crate::error::{Result, ZuError};

/// Copy-loop chunk size, also the initial size of reusable buffers.
pub const COPY_CHUNK: usize = 64 * 1024;

/// What an input path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Other,
}

/// Stat summary for one input.
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub path: PathBuf,
    /// Name the entry will carry inside the archive
    pub archive_name: String,
    pub kind: FileKind,
    pub size: u64,
    pub mtime_unix: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

fn mtime_of(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Some(d.as_secs() as i64),
            Err(e) => Some(-(e.duration().as_secs() as i64)),
        })
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.mode(), meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> (u32, u32, u32) {
    (0, 0, 0)
}

#[cfg(unix)]
fn kind_of(meta: &fs::Metadata) -> FileKind {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_fifo() {
        FileKind::Fifo
    } else if ft.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    }
}

#[cfg(not(unix))]
fn kind_of(meta: &fs::Metadata) -> FileKind {
    let ft = meta.file_type();
    if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    }
}

/// Stat one path. With `follow_symlinks` the link target is described;
/// otherwise the link itself is reported as [`FileKind::Symlink`].
pub fn describe(path: &Path, archive_name: String, follow_symlinks: bool) -> Result<InputInfo> {
    let meta = if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
    .map_err(|e| {
        ZuError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let (mode, uid, gid) = mode_of(&meta);
    Ok(InputInfo {
        path: path.to_path_buf(),
        archive_name,
        kind: kind_of(&meta),
        size: meta.len(),
        mtime_unix: mtime_of(&meta),
        mode,
        uid,
        gid,
    })
}

/// Read a symlink target as raw bytes.
#[cfg(unix)]
pub fn read_link_bytes(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    let target = fs::read_link(path)?;
    Ok(target.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
pub fn read_link_bytes(path: &Path) -> Result<Vec<u8>> {
    let target = fs::read_link(path)?;
    Ok(target.to_string_lossy().into_owned().into_bytes())
}

/// Create every missing parent of `path`.
pub fn mkdir_parents(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Apply Unix permission bits to an extracted file.
#[cfg(unix)]
pub fn restore_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn restore_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Set the modification time of an extracted file.
pub fn restore_mtime(file: &File, mtime_unix: i64) -> Result<()> {
    let when = if mtime_unix >= 0 {
        UNIX_EPOCH + Duration::from_secs(mtime_unix as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-mtime_unix) as u64)
    };
    file.set_modified(when)?;
    Ok(())
}

/// Recreate a symbolic link with the stored target.
#[cfg(unix)]
pub fn make_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(OsStr::from_bytes(target), link)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_symlink(_target: &[u8], link: &Path) -> Result<()> {
    Err(ZuError::NotImplemented(format!(
        "symlink extraction on this platform: {}",
        link.display()
    )))
}

/// Move the finished temp file over the target. Rename first; when that
/// fails (cross-device temp dir), fall back to copy-then-unlink.
pub fn rename_or_copy(temp: &Path, target: &Path) -> Result<()> {
    if fs::rename(temp, target).is_ok() {
        return Ok(());
    }
    fs::copy(temp, target)?;
    fs::remove_file(temp)?;
    Ok(())
}

/// Copy exactly `len` bytes between handles through the reusable buffer.
pub fn copy_range(
    src: &mut dyn Read,
    dst: &mut dyn Write,
    len: u64,
    buf: &mut Vec<u8>,
) -> Result<()> {
    if buf.len() < COPY_CHUNK {
        buf.resize(COPY_CHUNK, 0);
    }
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let got = src.read(&mut buf[..want])?;
        if got == 0 {
            return Err(ZuError::invalid_data("unexpected end of archive data"));
        }
        dst.write_all(&buf[..got])?;
        remaining -= got as u64;
    }
    Ok(())
}

/// Result of staging a non-seekable stream.
#[derive(Debug)]
pub struct StagedInput {
    pub path: PathBuf,
    pub size: u64,
    pub crc32: u32,
    pub is_text: bool,
}

/// Probe heuristic: text means no NUL and mostly printable bytes.
pub fn looks_like_text(probe: &[u8]) -> bool {
    if probe.is_empty() {
        return true;
    }
    if probe.contains(&0) {
        return false;
    }
    let printable = probe
        .iter()
        .filter(|&&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7F).contains(&b) || b >= 0x80)
        .count();
    printable * 100 / probe.len() >= 95
}

/// Drain a stream (normally stdin) into a scratch file so it becomes
/// seekable, collecting size, CRC and a text probe along the way.
pub fn stage_stream(src: &mut dyn Read, scratch_dir: &Path) -> Result<StagedInput> {
    let path = scratch_dir.join(format!("zu-stdin-{}.tmp", std::process::id()));
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    let mut crc = Crc32::new();
    let mut size = 0u64;
    let mut probe = Vec::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let got = src.read(&mut buf)?;
        if got == 0 {
            break;
        }
        if probe.len() < 512 {
            let take = (512 - probe.len()).min(got);
            probe.extend_from_slice(&buf[..take]);
        }
        crc.update(&buf[..got]);
        out.write_all(&buf[..got])?;
        size += got as u64;
    }
    out.flush()?;
    Ok(StagedInput {
        path,
        size,
        crc32: crc.finalize(),
        is_text: looks_like_text(&probe),
    })
}

/// Scoped temp-file path: removed on drop unless disarmed by `keep`.
pub struct TempGuard {
    path: Option<PathBuf>,
}

impl TempGuard {
    pub fn new(path: PathBuf) -> Self {
        TempGuard { path: Some(path) }
    }

    /// Forget the path; the caller has renamed it into place.
    pub fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(path);
        }
    }
}
