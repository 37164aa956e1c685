use std::io::{Read, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use annexport_domain::{ArchiveFormat, CommitId};

use crate::core::annex::{AnnexCliResolver, DirectResolver};
use crate::core::git::{ArchiveProducer, Repository};
use crate::core::rewrite::{targz, zip, RewriteStats};

/// Typed failures callers are expected to branch on; everything else travels
/// as context-wrapped collaborator or stream errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("archive format {0} is recognized but not supported for export")]
    UnsupportedFormat(ArchiveFormat),
    #[error("commit {spec:?} does not exist in {repo}")]
    MissingCommit { spec: String, repo: String },
}

/// How annexed paths are detected and mapped to content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverStrategy {
    /// Parse pointer blobs in-process and derive content paths from the
    /// store's sharding convention.
    Direct,
    /// Ask the store tooling to enumerate annexed paths and map keys to
    /// content locations.
    Annex,
}

/// One export request. Values are borrowed because a request lives for a
/// single call; nothing is cached across calls.
#[derive(Clone, Copy, Debug)]
pub struct ExportRequest<'a> {
    /// Commit-ish spec; resolved to a full id before any work starts.
    pub commit: &'a str,
    pub format: ArchiveFormat,
    /// Prefix every entry name with `<repository name>/`.
    pub use_prefix: bool,
    pub strategy: ResolverStrategy,
}

/// Outcome of a finished export.
#[derive(Clone, Debug, Serialize)]
pub struct ExportSummary {
    pub commit: CommitId,
    pub format: ArchiveFormat,
    pub prefix: String,
    pub entries: usize,
    pub substituted: usize,
}

/// Sole entry point for the triggering layer: validates the request,
/// dispatches to the matching rewriter, and streams the finished archive into
/// the target writer.
pub struct ArchiveExportService {
    repo: Repository,
}

impl ArchiveExportService {
    #[must_use]
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Export the commit's full content as `request.format` into `target`.
    ///
    /// Validation happens before any output: an unsupported format or a
    /// nonexistent commit fails without a single byte written. A partially
    /// emitted stream counts as failed regardless of bytes already sent;
    /// nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] for request validation failures and
    /// context-wrapped errors for collaborator and stream failures.
    pub fn export(
        &self,
        request: &ExportRequest<'_>,
        target: &mut dyn Write,
    ) -> Result<ExportSummary> {
        if request.format == ArchiveFormat::Bundle {
            return Err(ExportError::UnsupportedFormat(request.format).into());
        }
        let commit = self
            .repo
            .resolve_commit(request.commit)
            .context("resolving requested commit")?
            .ok_or_else(|| ExportError::MissingCommit {
                spec: request.commit.to_string(),
                repo: self.repo.path().display().to_string(),
            })?;
        let prefix = if request.use_prefix {
            format!("{}/", self.repo.name())
        } else {
            String::new()
        };
        debug!(
            commit = %commit,
            format = %request.format,
            prefix = %prefix,
            strategy = ?request.strategy,
            "starting export"
        );

        let stats = match request.format {
            ArchiveFormat::TarGz => self.export_targz(&commit, &prefix, request.strategy, target),
            ArchiveFormat::Zip => self.export_zip(&commit, &prefix, request.strategy, target),
            ArchiveFormat::Bundle => unreachable!("rejected above"),
        }
        .with_context(|| format!("exporting {commit} as {}", request.format))?;

        let summary = ExportSummary {
            commit,
            format: request.format,
            prefix,
            entries: stats.entries,
            substituted: stats.substituted,
        };
        info!(
            commit = %summary.commit,
            format = %summary.format,
            entries = summary.entries,
            substituted = summary.substituted,
            "export complete"
        );
        Ok(summary)
    }

    /// Streaming path: the producer pipes a plain tar which is consumed
    /// incrementally. The direct strategy substitutes in place; the annex
    /// strategy passes the base through and appends the enumerated paths.
    fn export_targz(
        &self,
        commit: &CommitId,
        prefix: &str,
        strategy: ResolverStrategy,
        target: &mut dyn Write,
    ) -> Result<RewriteStats> {
        let mut producer = ArchiveProducer::spawn(&self.repo, "tar", prefix, commit)?;
        let rewritten = match strategy {
            ResolverStrategy::Direct => {
                let mut resolver = DirectResolver::new(&self.repo, commit.clone())?;
                targz::rewrite_streaming(producer.stream(), target, &mut resolver, prefix, commit)
            }
            ResolverStrategy::Annex => {
                let mut resolver = AnnexCliResolver::new(&self.repo, commit.clone())?;
                let annexed = resolver.annexed_paths();
                targz::rewrite_appending(
                    producer.stream(),
                    target,
                    &mut resolver,
                    &annexed,
                    prefix,
                    commit,
                )
            }
        };
        match (rewritten, producer.finish()) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
            // A dead producer usually explains the rewrite failure; keep both.
            (Err(rewrite), Err(producer)) => {
                Err(rewrite.context(format!("base archive producer also failed: {producer:#}")))
            }
        }
    }

    /// Materialized path: the zip container's central directory is a trailer,
    /// so the producer's output is buffered completely before any entry is
    /// read.
    fn export_zip(
        &self,
        commit: &CommitId,
        prefix: &str,
        strategy: ResolverStrategy,
        target: &mut dyn Write,
    ) -> Result<RewriteStats> {
        let mut producer = ArchiveProducer::spawn(&self.repo, "zip", prefix, commit)?;
        let mut base = Vec::new();
        let buffered = producer
            .stream()
            .read_to_end(&mut base)
            .context("buffering base zip archive");
        let finished = producer.finish();
        buffered?;
        finished?;

        match strategy {
            ResolverStrategy::Direct => {
                let mut resolver = DirectResolver::new(&self.repo, commit.clone())?;
                zip::rewrite_materialized(base, target, &mut resolver, prefix, commit)
            }
            ResolverStrategy::Annex => {
                let mut resolver = AnnexCliResolver::new(&self.repo, commit.clone())?;
                zip::rewrite_materialized(base, target, &mut resolver, prefix, commit)
            }
        }
    }
}
