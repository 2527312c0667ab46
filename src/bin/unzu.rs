//! `unzu` - list, test and extract ZIP archives

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use zu::context::ZuContext;
use zu::reader::ArchiveReader;

#[derive(Parser, Debug)]
#[command(
    name = "unzu",
    version,
    about = "List, test and extract ZIP archives",
    after_help = "Exit codes: 0 ok, 2 I/O error, 3 unsupported, 5 out of memory, \
                  10 usage error, 11 nothing matched, 81/82 password problems."
)]
struct Cli {
    /// Archive to read
    archive: PathBuf,

    /// Entry patterns to operate on (all entries when omitted)
    members: Vec<String>,

    /// List entries instead of extracting
    #[arg(short = 'l', long, conflicts_with_all = ["test", "pipe"])]
    list: bool,

    /// Test entry integrity without writing anything
    #[arg(short = 't', long, conflicts_with = "pipe")]
    test: bool,

    /// Extract to stdout instead of the filesystem
    #[arg(short = 'p', long)]
    pipe: bool,

    /// Extract into this directory
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Overwrite existing files without asking
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Junk paths: extract bare file names
    #[arg(short = 'j', long)]
    junk_paths: bool,

    /// Skip entries matching these patterns
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Password for encrypted entries
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Ignore case when matching patterns
    #[arg(short = 'C', long = "ignore-case")]
    ignore_case: bool,

    /// Only touch entries modified at/after this time (unix seconds)
    #[arg(long = "after")]
    after: Option<i64>,

    /// Only touch entries modified before this time (unix seconds)
    #[arg(long = "before")]
    before: Option<i64>,

    /// Suppress progress output (repeat for silence)
    #[arg(short = 'q', long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Verbose listing
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut ctx = ZuContext::new(cli.archive.clone());
    ctx.include_patterns = cli.members;
    ctx.exclude_patterns = cli.exclude;
    ctx.dest_dir = cli.dir;
    ctx.overwrite = cli.overwrite;
    ctx.junk_paths = cli.junk_paths;
    ctx.password = cli.password.map(String::into_bytes);
    ctx.case_insensitive = cli.ignore_case;
    ctx.time_after = cli.after;
    ctx.time_before = cli.before;
    ctx.quiet = cli.quiet;
    ctx.verbose = cli.verbose;
    ctx.to_stdout = cli.pipe;
    ctx.test_only = cli.test;

    let result = ArchiveReader::open(&cli.archive).and_then(|mut reader| {
        if cli.list {
            reader.list(&mut ctx).map(|_| ())
        } else if cli.test {
            reader.test(&mut ctx).map(|_| ())
        } else {
            reader.extract(&mut ctx).map(|_| ())
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("unzu: {}", err);
            ExitCode::from(err.kind().reader_exit_code() as u8)
        }
    }
}
