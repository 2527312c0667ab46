//! Modify orchestration: merge existing entries with new inputs
//!
//! A modify run loads the existing central directory (or rebuilds it in
//! repair mode), decides the fate of every existing entry against the
//! collected inputs, emits the merged sequence into a sibling temp file,
//! and atomically replaces the target. New and changed entries go first
//! in input order, preserved entries follow in their original order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use crate::context::{FixLevel, RunMode, ZuContext};
use crate::entry::EntryState;
use crate::error::{Result, ZuError};
use crate::fsio::{self, FileKind, InputInfo, TempGuard};
use crate::headers::dos_precision;
use crate::policy::{archive_name_for, junk_basename, Selector};
use crate::reader::ArchiveReader;
use crate::recover;
use crate::writer::{choose_method, ArchiveWriter, EntryPlan};

/// What a modify run did.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunReport {
    pub added: usize,
    pub deleted: usize,
    pub kept: usize,
    pub skipped: usize,
}

/// Outcome of a modify run.
#[derive(Debug)]
pub enum RunOutcome {
    Written(RunReport),
    /// Nothing changed and nothing forced a rewrite
    NothingToDo,
}

/// Run the archiver side: create, add, update, freshen, filesync,
/// delete, copy or repair.
pub fn run(ctx: &mut ZuContext) -> Result<RunOutcome> {
    let mut source = load_existing(ctx)?;
    let old_comment = source.as_ref().map(|s| s.comment.clone()).unwrap_or_default();

    let inputs = match ctx.mode {
        RunMode::Delete | RunMode::Copy => Vec::new(),
        _ => collect_inputs(ctx)?,
    };
    ctx.inputs = inputs;

    let to_add = build_plan(ctx)?;

    let changed = !to_add.is_empty()
        || ctx
            .existing
            .iter()
            .any(|e| e.state != EntryState::Kept);
    let comment_changed = matches!(&ctx.comment, Some(c) if c != &old_comment);
    if !changed
        && !comment_changed
        && !ctx.archive_mtime_latest
        && ctx.fix == FixLevel::None
        && ctx.mode != RunMode::Copy
    {
        return Ok(RunOutcome::NothingToDo);
    }

    let mut report = RunReport {
        deleted: ctx
            .existing
            .iter()
            .filter(|e| e.state == EntryState::Removed)
            .count(),
        kept: ctx
            .existing
            .iter()
            .filter(|e| e.state == EntryState::Kept)
            .count(),
        ..Default::default()
    };

    if ctx.dry_run {
        for &i in &to_add {
            println!("would add: {}", ctx.inputs[i].archive_name);
        }
        for e in ctx.existing.iter().filter(|e| e.state == EntryState::Removed) {
            println!("would delete: {}", e.name);
        }
        report.added = to_add.len();
        return Ok(RunOutcome::Written(report));
    }

    let out_target = ctx
        .out_path
        .clone()
        .unwrap_or_else(|| ctx.archive_path.clone());
    let temp_path = temp_path_for(&out_target, ctx.temp_dir.as_deref());
    let guard = TempGuard::new(temp_path.clone());

    {
        let file = File::create(&temp_path)?;
        let mut writer = ArchiveWriter::new(BufWriter::new(file), ctx.zip64_trigger);

        for &i in &to_add {
            let info = ctx.inputs[i].clone();
            emit_input(ctx, &mut writer, &info)?;
            report.added += 1;
        }

        for index in 0..ctx.existing.len() {
            if ctx.existing[index].state != EntryState::Kept {
                continue;
            }
            let entry = ctx.existing[index].clone();
            let src = source
                .as_mut()
                .ok_or_else(|| ZuError::invalid_data("carry-over without a source archive"))?;
            writer.copy_entry_from(&mut src.file, &entry, ctx.strip_extras, &mut ctx.copy_buf)?;
        }

        let comment = ctx.comment.clone().unwrap_or(old_comment);
        let sink = writer.finish(&comment)?;
        // the handle must be gone before the rename
        let file = sink.into_inner().map_err(|e| ZuError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);
    }
    drop(source);

    fsio::rename_or_copy(&temp_path, &out_target)?;
    guard.keep();
    if ctx.archive_mtime_latest {
        set_archive_mtime_to_latest(&out_target, ctx)?;
    }
    Ok(RunOutcome::Written(report))
}

struct SourceArchive {
    file: BufReader<File>,
    comment: Vec<u8>,
}

/// Load the existing archive into `ctx.existing` according to the repair
/// level, returning the open source handle for carry-over reads.
fn load_existing(ctx: &mut ZuContext) -> Result<Option<SourceArchive>> {
    ctx.existing.clear();
    let exists = ctx.archive_path.exists();
    if !exists {
        let needs_archive = matches!(
            ctx.mode,
            RunMode::Freshen | RunMode::Delete | RunMode::Copy
        ) || ctx.fix != FixLevel::None;
        if needs_archive {
            return Err(ZuError::Usage(format!(
                "{}: archive not found",
                ctx.archive_path.display()
            )));
        }
        return Ok(None);
    }

    match ctx.fix {
        FixLevel::FixFix => {
            let mut file = BufReader::new(File::open(&ctx.archive_path)?);
            let recovered = recover::scan(&mut file)?;
            if ctx.quiet == 0 {
                for name in &recovered.estimated {
                    println!("caution: {}: compressed size estimated from header gap", name);
                }
            }
            ctx.existing = recovered.entries;
            Ok(Some(SourceArchive {
                file,
                comment: Vec::new(),
            }))
        }
        _ => {
            let reader = ArchiveReader::open(&ctx.archive_path)?;
            let (file, directory, entries) = reader.into_parts();
            ctx.existing = entries;
            Ok(Some(SourceArchive {
                file,
                comment: directory.comment,
            }))
        }
    }
}

/// Expand the input paths into stat'ed entries, recursing into
/// directories when asked, applying selection and the time window.
fn collect_inputs(ctx: &mut ZuContext) -> Result<Vec<InputInfo>> {
    let mut selector = Selector::new(
        &ctx.include_patterns,
        &ctx.exclude_patterns,
        ctx.case_insensitive,
    )?;
    let mut inputs = Vec::new();
    let follow = !ctx.store_symlinks;

    for raw in ctx.input_paths.clone() {
        if raw == "-" {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            inputs.push(InputInfo {
                path: PathBuf::from("-"),
                archive_name: "-".to_string(),
                kind: FileKind::Fifo,
                size: 0,
                mtime_unix: now,
                mode: 0o100644,
                uid: 0,
                gid: 0,
            });
            continue;
        }
        let path = Path::new(&raw);
        let info = fsio::describe(path, name_for(ctx, &raw), follow)?;
        match info.kind {
            FileKind::Directory if ctx.recurse => {
                for item in WalkDir::new(path).follow_links(follow) {
                    let item = item.map_err(|e| {
                        ZuError::Io(std::io::Error::other(format!("walking {}: {}", raw, e)))
                    })?;
                    let item_path = item.path().to_string_lossy().into_owned();
                    let info =
                        fsio::describe(item.path(), name_for(ctx, &item_path), follow)?;
                    push_input(ctx, &mut selector, &mut inputs, info);
                }
            }
            _ => push_input(ctx, &mut selector, &mut inputs, info),
        }
    }
    Ok(inputs)
}

fn name_for(ctx: &ZuContext, raw: &str) -> String {
    let name = archive_name_for(raw);
    if ctx.junk_paths {
        junk_basename(&name).to_string()
    } else {
        name
    }
}

fn push_input(
    ctx: &ZuContext,
    selector: &mut Selector,
    inputs: &mut Vec<InputInfo>,
    mut info: InputInfo,
) {
    if info.kind == FileKind::Directory {
        if ctx.junk_paths || info.archive_name.is_empty() {
            return;
        }
        if !info.archive_name.ends_with('/') {
            info.archive_name.push('/');
        }
    }
    if info.archive_name.is_empty() || !selector.matches(&info.archive_name) {
        return;
    }
    if !ctx.within_time_window(info.mtime_unix) {
        return;
    }
    inputs.push(info);
}

/// Apply the per-mode decision table, marking existing entries and
/// returning the indexes of inputs to add.
fn build_plan(ctx: &mut ZuContext) -> Result<Vec<usize>> {
    match ctx.mode {
        RunMode::Delete => {
            plan_delete(ctx)?;
            Ok(Vec::new())
        }
        RunMode::Copy => {
            plan_copy(ctx)?;
            Ok(Vec::new())
        }
        _ => plan_merge(ctx),
    }
}

fn find_existing(ctx: &ZuContext, name: &str) -> Option<usize> {
    if ctx.case_insensitive {
        ctx.existing
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    } else {
        ctx.existing.iter().position(|e| e.name == name)
    }
}

fn plan_merge(ctx: &mut ZuContext) -> Result<Vec<usize>> {
    let mut to_add = Vec::new();
    let mut touched = vec![false; ctx.existing.len()];

    for i in 0..ctx.inputs.len() {
        let input = &ctx.inputs[i];
        let existing = find_existing(ctx, &input.archive_name);
        if let Some(at) = existing {
            touched[at] = true;
        }
        let take = match (ctx.mode, existing) {
            (RunMode::Add, _) => true,
            (RunMode::Update, None) => true,
            (RunMode::Update, Some(at)) | (RunMode::Freshen, Some(at)) => {
                dos_precision(input.mtime_unix)
                    > dos_precision(ctx.existing[at].mtime_unix())
            }
            (RunMode::Freshen, None) => false,
            (RunMode::Filesync, None) => true,
            (RunMode::Filesync, Some(at)) => {
                let e = &ctx.existing[at];
                dos_precision(input.mtime_unix) != dos_precision(e.mtime_unix())
                    || (input.kind == FileKind::Regular && input.size != e.uncompressed_size)
            }
            (RunMode::Delete | RunMode::Copy, _) => unreachable!(),
        };
        if take {
            if let Some(at) = existing {
                ctx.existing[at].state = EntryState::Removed;
            }
            to_add.push(i);
        }
    }

    // filesync also drops entries whose path vanished from disk
    if ctx.mode == RunMode::Filesync {
        for (at, entry) in ctx.existing.iter_mut().enumerate() {
            if touched[at] || entry.state != EntryState::Kept {
                continue;
            }
            let on_disk = Path::new(entry.name.trim_end_matches('/'))
                .symlink_metadata()
                .is_ok();
            if !on_disk {
                entry.state = EntryState::Removed;
            }
        }
    }

    if to_add.is_empty()
        && ctx.inputs.is_empty()
        && ctx.existing.is_empty()
        && ctx.fix == FixLevel::None
        && ctx.comment.is_none()
    {
        return Err(ZuError::NoFiles("nothing to do".into()));
    }
    Ok(to_add)
}

/// Remove entries matching the argument patterns; the time window
/// constrains which matched entries are actually deleted.
fn plan_delete(ctx: &mut ZuContext) -> Result<()> {
    let mut selector = Selector::new(&ctx.input_paths, &ctx.exclude_patterns, ctx.case_insensitive)?;
    let decisions: Vec<(bool, bool)> = ctx
        .existing
        .iter()
        .map(|entry| {
            let matches = selector.matches(&entry.name);
            let within_window = matches && ctx.within_time_window(entry.mtime_unix());
            (matches, within_window)
        })
        .collect();
    let mut matched = 0usize;
    for (entry, (matches, within_window)) in ctx.existing.iter_mut().zip(decisions) {
        if !matches {
            continue;
        }
        matched += 1;
        if within_window {
            entry.state = EntryState::Removed;
            if ctx.quiet == 0 {
                println!("deleting: {}", entry.name);
            }
        }
    }
    if matched == 0 {
        return Err(ZuError::NoFiles("nothing to delete".into()));
    }
    Ok(())
}

/// Keep entries matching the argument patterns, drop the rest; the
/// result lands in the `--out` archive.
fn plan_copy(ctx: &mut ZuContext) -> Result<()> {
    if ctx.out_path.is_none() {
        return Err(ZuError::Usage(
            "copy mode requires an output archive path".into(),
        ));
    }
    let mut selector = Selector::new(&ctx.input_paths, &ctx.exclude_patterns, ctx.case_insensitive)?;
    let keep_flags: Vec<bool> = ctx
        .existing
        .iter()
        .map(|entry| selector.matches(&entry.name) && ctx.within_time_window(entry.mtime_unix()))
        .collect();
    let mut matched = 0usize;
    for (entry, keep) in ctx.existing.iter_mut().zip(keep_flags) {
        if keep {
            matched += 1;
        } else {
            entry.state = EntryState::Removed;
        }
    }
    if matched == 0 {
        return Err(ZuError::NoFiles("no entries selected to copy".into()));
    }
    Ok(())
}

/// Emit one collected input through the appropriate writer path.
fn emit_input<W: Write>(
    ctx: &mut ZuContext,
    writer: &mut ArchiveWriter<W>,
    info: &InputInfo,
) -> Result<()> {
    let method = choose_method(
        ctx.method,
        ctx.level,
        &info.archive_name,
        info.size,
        &ctx.no_compress_suffixes,
    );
    let plan = EntryPlan {
        name: info.archive_name.clone(),
        method,
        level: ctx.level,
        mtime_unix: info.mtime_unix,
        mode: info.mode,
        uid: info.uid,
        gid: info.gid,
        strip_extras: ctx.strip_extras,
    };
    let password = ctx.password.clone();
    let password = password.as_deref();

    match info.kind {
        FileKind::Directory => writer.add_directory(&plan)?,
        FileKind::Symlink => {
            let target = fsio::read_link_bytes(&info.path)?;
            writer.add_data_staged(&plan, &target, &mut ctx.stage_buf, password)?;
        }
        FileKind::Fifo => {
            if info.path.as_os_str() == "-" {
                let stdin = std::io::stdin();
                let mut lock = stdin.lock();
                if ctx.translate_eol.is_some() {
                    // stage stdin so the text probe can decide whether
                    // translation applies at all
                    let scratch = ctx
                        .temp_dir
                        .clone()
                        .or_else(|| ctx.archive_path.parent().map(Path::to_path_buf))
                        .unwrap_or_else(|| PathBuf::from("."));
                    let staged = fsio::stage_stream(&mut lock, &scratch)?;
                    let translate = staged.is_text.then_some(ctx.translate_eol).flatten();
                    let mut file = File::open(&staged.path)?;
                    let result = writer.add_stream(&plan, &mut file, translate, password);
                    let _ = std::fs::remove_file(&staged.path);
                    result?;
                } else {
                    writer.add_stream(&plan, &mut lock, None, password)?;
                }
            } else {
                let mut file = File::open(&info.path)?;
                writer.add_stream(&plan, &mut file, ctx.translate_eol, password)?;
            }
        }
        FileKind::Regular => {
            let translate = match ctx.translate_eol {
                Some(mode) => {
                    let mut probe = [0u8; 512];
                    let mut file = File::open(&info.path)?;
                    let got = file.read(&mut probe)?;
                    fsio::looks_like_text(&probe[..got]).then_some((mode, file))
                }
                None => None,
            };
            match translate {
                Some((mode, mut file)) => {
                    // size will change under translation, so stream it
                    file.seek(SeekFrom::Start(0))?;
                    writer.add_stream(&plan, &mut file, Some(mode), password)?;
                }
                None => {
                    writer.add_path_staged(&plan, &info.path, &mut ctx.stage_buf, password)?;
                }
            }
        }
        FileKind::Other => {
            return Err(ZuError::NotImplemented(format!(
                "special file {}",
                info.path.display()
            )));
        }
    }

    if ctx.quiet == 0 {
        if let Some(entry) = writer.last_entry() {
            println!(
                "  adding: {} ({} {}%)",
                entry.name,
                crate::codec::method_name(entry.method),
                entry.ratio_percent()
            );
        }
    }
    Ok(())
}

/// Temporary output beside the target (or in the configured temp dir).
fn temp_path_for(target: &Path, temp_dir: Option<&Path>) -> PathBuf {
    let base = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive.zip".to_string());
    let dir = temp_dir
        .map(Path::to_path_buf)
        .or_else(|| target.parent().map(Path::to_path_buf))
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("{}.tmp", base))
}

/// Restore an archive's own mtime to its newest entry, used after a
/// rewrite when the latest-time policy is set.
pub fn set_archive_mtime_to_latest(path: &Path, ctx: &ZuContext) -> Result<()> {
    let newest = ctx
        .existing
        .iter()
        .filter(|e| e.state != EntryState::Removed)
        .map(|e| e.mtime_unix())
        .chain(ctx.inputs.iter().map(|i| i.mtime_unix))
        .max();
    if let Some(mtime) = newest {
        let file = File::options().write(true).open(path)?;
        fsio::restore_mtime(&file, mtime)?;
    }
    Ok(())
}
