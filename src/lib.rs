//! # zip-utils: a PKZIP archiver/extractor pair
//!
//! `zip-utils` is the engine behind the `zu` (create/update) and `unzu`
//! (list/test/extract) command-line tools. It reads and writes the ZIP
//! format end to end: EOCD location with ZIP64 escalation, central
//! directory parsing, store/deflate/bzip2 entry pipelines with CRC-32
//! verification, classic ZipCrypto, streaming writes with data
//! descriptors, in-place-style archive modification through a temp file
//! and atomic replace, and central-directory recovery from a
//! local-header scan.
//!
//! ## Reading an archive
//!
//! ```no_run
//! use zu::reader::ArchiveReader;
//!
//! let mut reader = ArchiveReader::open("archive.zip".as_ref())?;
//! for entry in reader.entries() {
//!     println!("{}: {} bytes", entry.name, entry.uncompressed_size);
//! }
//! let data = reader.read_entry_by_name("file.txt", None)?;
//! # Ok::<(), zu::ZuError>(())
//! ```
//!
//! ## Writing an archive
//!
//! ```no_run
//! use zu::context::ZuContext;
//! use zu::modify;
//!
//! let mut ctx = ZuContext::new("output.zip");
//! ctx.input_paths = vec!["file1.txt".into(), "file2.txt".into()];
//! modify::run(&mut ctx)?;
//! # Ok::<(), zu::ZuError>(())
//! ```

pub mod codec;
pub mod context;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod fsio;
pub mod headers;
pub mod locator;
pub mod modify;
pub mod policy;
pub mod reader;
pub mod recover;
pub mod writer;

pub use context::ZuContext;
pub use entry::{Entry, EntryState};
pub use error::{Result, StatusKind, ZuError};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;
