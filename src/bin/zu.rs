//! `zu` - create and modify ZIP archives

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use zu::codec::{METHOD_BZIP2, METHOD_DEFLATE, METHOD_STORE};
use zu::context::{EolMode, FixLevel, RunMode, ZuContext};
use zu::error::StatusKind;
use zu::modify::{self, RunOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "zu",
    version,
    about = "Create and modify ZIP archives",
    after_help = "Exit codes: 0 ok, 2 I/O error, 3 unsupported, 5 out of memory, \
                  12 nothing to do, 16 usage error."
)]
struct Cli {
    /// Archive to create or modify
    archive: PathBuf,

    /// Files, directories, or (for -d/--copy) entry patterns; "-" reads stdin
    inputs: Vec<String>,

    /// Update: add new files and replace entries only when newer
    #[arg(short = 'u', long, conflicts_with_all = ["freshen", "filesync", "delete", "copy"])]
    update: bool,

    /// Freshen: replace existing entries only, and only when newer
    #[arg(short = 'f', long, conflicts_with_all = ["filesync", "delete", "copy"])]
    freshen: bool,

    /// Filesync: mirror the filesystem, dropping entries with no file
    #[arg(long = "fs", conflicts_with_all = ["delete", "copy"])]
    filesync: bool,

    /// Delete entries matching the given patterns
    #[arg(short = 'd', long, conflicts_with = "copy")]
    delete: bool,

    /// Copy matching entries from the archive into --out
    #[arg(short = 'U', long = "copy")]
    copy: bool,

    /// Fix: rewrite the archive trusting its central directory
    #[arg(short = 'F', long)]
    fix: bool,

    /// Fix harder: rebuild the central directory from a local-header scan
    #[arg(long = "FF")]
    fix_fix: bool,

    /// Recurse into directories
    #[arg(short = 'r', long)]
    recurse: bool,

    /// Junk paths: store bare file names
    #[arg(short = 'j', long)]
    junk_paths: bool,

    /// Compression level (0 stores, 9 compresses hardest)
    #[arg(short = 'L', long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Compression method: store, deflate or bzip2
    #[arg(short = 'Z', long, default_value = "deflate")]
    method: String,

    /// Write the result here instead of replacing the archive
    #[arg(short = 'O', long = "out")]
    out: Option<PathBuf>,

    /// Directory for the temporary output file
    #[arg(short = 'b', long = "temp-dir")]
    temp_dir: Option<PathBuf>,

    /// Include only input names matching these patterns
    #[arg(short = 'i', long = "include")]
    include: Vec<String>,

    /// Skip input names matching these patterns
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Extra suffixes to store without compression
    #[arg(short = 'n', long = "no-compress-suffix")]
    no_compress: Vec<String>,

    /// Encrypt entries with this password (classic ZipCrypto)
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Store symlinks as links instead of following them
    #[arg(short = 'y', long = "symlinks")]
    symlinks: bool,

    /// Translate LF to CRLF in probable text files
    #[arg(short = 'l', long = "to-crlf", conflicts_with = "to_lf")]
    to_crlf: bool,

    /// Translate CRLF to LF in probable text files
    #[arg(long = "to-lf")]
    to_lf: bool,

    /// Strip timestamp and ownership extras
    #[arg(short = 'X', long = "strip-extra")]
    strip_extra: bool,

    /// Only touch inputs modified at/after this time (unix seconds)
    #[arg(long = "after")]
    after: Option<i64>,

    /// Only touch inputs modified before this time (unix seconds)
    #[arg(long = "before")]
    before: Option<i64>,

    /// Set the archive comment
    #[arg(short = 'z', long)]
    comment: Option<String>,

    /// Give the archive the mtime of its newest entry
    #[arg(short = 'o', long = "latest-time")]
    latest_time: bool,

    /// Ignore case when matching names and patterns
    #[arg(short = 'C', long = "ignore-case")]
    ignore_case: bool,

    /// Show what would be done without writing
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Suppress progress output (repeat for silence)
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn context_from(cli: Cli) -> Result<ZuContext, String> {
    let mut ctx = ZuContext::new(cli.archive);
    ctx.input_paths = cli.inputs;
    ctx.mode = if cli.delete {
        RunMode::Delete
    } else if cli.copy {
        RunMode::Copy
    } else if cli.filesync {
        RunMode::Filesync
    } else if cli.freshen {
        RunMode::Freshen
    } else if cli.update {
        RunMode::Update
    } else {
        RunMode::Add
    };
    ctx.fix = if cli.fix_fix {
        FixLevel::FixFix
    } else if cli.fix {
        FixLevel::Fix
    } else {
        FixLevel::None
    };
    ctx.method = match cli.method.as_str() {
        "store" => METHOD_STORE,
        "deflate" => METHOD_DEFLATE,
        "bzip2" => METHOD_BZIP2,
        other => return Err(format!("unknown method: {}", other)),
    };
    ctx.level = cli.level;
    ctx.recurse = cli.recurse;
    ctx.junk_paths = cli.junk_paths;
    ctx.out_path = cli.out;
    ctx.temp_dir = cli.temp_dir;
    ctx.include_patterns = cli.include;
    ctx.exclude_patterns = cli.exclude;
    ctx.no_compress_suffixes.extend(cli.no_compress);
    ctx.password = cli.password.map(String::into_bytes);
    ctx.store_symlinks = cli.symlinks;
    ctx.translate_eol = if cli.to_crlf {
        Some(EolMode::LfToCrLf)
    } else if cli.to_lf {
        Some(EolMode::CrLfToLf)
    } else {
        None
    };
    ctx.strip_extras = cli.strip_extra;
    ctx.time_after = cli.after;
    ctx.time_before = cli.before;
    ctx.comment = cli.comment.map(String::into_bytes);
    ctx.archive_mtime_latest = cli.latest_time;
    ctx.case_insensitive = cli.ignore_case;
    ctx.dry_run = cli.dry_run;
    ctx.quiet = cli.quiet;
    ctx.verbose = cli.verbose;
    Ok(ctx)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut ctx = match context_from(cli) {
        Ok(ctx) => ctx,
        Err(msg) => {
            eprintln!("zu: {}", msg);
            return ExitCode::from(StatusKind::Usage.writer_exit_code() as u8);
        }
    };

    match modify::run(&mut ctx) {
        Ok(RunOutcome::Written(report)) => {
            if ctx.quiet == 0 && ctx.verbose {
                eprintln!(
                    "zu: {} added, {} deleted, {} kept",
                    report.added, report.deleted, report.kept
                );
            }
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::NothingToDo) => {
            if ctx.quiet < 2 {
                eprintln!("zu: nothing to do");
            }
            ExitCode::from(StatusKind::NoFiles.writer_exit_code() as u8)
        }
        Err(err) => {
            eprintln!("zu: {}", err);
            ExitCode::from(err.kind().writer_exit_code() as u8)
        }
    }
}
