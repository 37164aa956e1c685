#![deny(clippy::all, warnings)]

mod core;

pub use annexport_domain::{
    AnnexKey, ArchiveFormat, CommitId, FileMode, PointerRecord, TreeEntry, UnknownFormatError,
};

pub use crate::core::annex::{AnnexCliResolver, AnnexResolver, AnnexedContent, DirectResolver};
pub use crate::core::export::{
    ArchiveExportService, ExportError, ExportRequest, ExportSummary, ResolverStrategy,
};
pub use crate::core::git::{ArchiveProducer, Repository};
pub use crate::core::process::RunOutput;
pub use crate::core::rewrite::RewriteStats;

pub mod rewrite {
    pub use crate::core::rewrite::*;
}
