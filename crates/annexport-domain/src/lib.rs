#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod format;
pub mod key;
pub mod pointer;
pub mod tree;

pub use format::{ArchiveFormat, UnknownFormatError};
pub use key::{AnnexKey, KeyParseError};
pub use pointer::{PointerRecord, MAX_POINTER_LENGTH};
pub use tree::{CommitId, FileMode, TreeEntry};
