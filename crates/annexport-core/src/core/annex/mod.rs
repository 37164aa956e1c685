use std::{
    collections::BTreeSet,
    fs::{self, Metadata},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use tracing::{debug, trace};

use annexport_domain::{AnnexKey, CommitId, PointerRecord, MAX_POINTER_LENGTH};

use crate::core::git::Repository;

/// Real bytes backing a pointer blob, resolved and stat'ed.
///
/// Carries the stat result so rewriters build headers from the real file's
/// size/mode/mtime, never from the pointer blob. Instances live for one entry
/// and are dropped immediately after use.
#[derive(Debug)]
pub struct AnnexedContent {
    pub key: AnnexKey,
    pub location: PathBuf,
    pub metadata: Metadata,
}

/// Decides whether a tracked path is a store pointer at the export's commit
/// and, if so, where its real bytes live.
///
/// `Ok(None)` is the ordinary "not a pointer" answer. Errors are reserved for
/// collaborator failures and for content the tree promises but the store
/// cannot produce; both abort the export and are never retried.
pub trait AnnexResolver {
    fn resolve(&mut self, path: &str) -> Result<Option<AnnexedContent>>;
}

fn stat_content(key: AnnexKey, location: PathBuf, path: &str) -> Result<AnnexedContent> {
    let metadata = fs::metadata(&location).with_context(|| {
        format!(
            "content for key {key} (tracked path {path}) is not available at {}",
            location.display()
        )
    })?;
    if !metadata.is_file() {
        bail!(
            "content location {} for key {key} (tracked path {path}) is not a regular file",
            location.display()
        );
    }
    Ok(AnnexedContent {
        key,
        location,
        metadata,
    })
}

/// In-process strategy: parse the blob against the pointer grammar and derive
/// the content path from the key's sharding convention. No store tooling is
/// invoked.
pub struct DirectResolver<'r> {
    repo: &'r Repository,
    commit: CommitId,
    objects_root: PathBuf,
}

impl<'r> DirectResolver<'r> {
    /// # Errors
    ///
    /// Returns an error when the repository's git directory cannot be
    /// located.
    pub fn new(repo: &'r Repository, commit: CommitId) -> Result<Self> {
        let objects_root = repo.git_dir()?.join("annex").join("objects");
        Ok(Self {
            repo,
            commit,
            objects_root,
        })
    }

    fn locate(&self, key: AnnexKey, path: &str) -> Result<AnnexedContent> {
        // Mixed-case sharding is what local object stores use; the lowercase
        // convention covers stores populated by bare-repo tooling.
        for dir in [key.hash_dir_mixed(), key.hash_dir_lower()] {
            let candidate = self
                .objects_root
                .join(dir)
                .join(key.as_str())
                .join(key.as_str());
            if candidate.is_file() {
                trace!(key = %key, location = %candidate.display(), "resolved store content");
                return stat_content(key, candidate, path);
            }
        }
        bail!(
            "content for key {key} (tracked path {path}) is not present under {}",
            self.objects_root.display()
        );
    }
}

impl AnnexResolver for DirectResolver<'_> {
    fn resolve(&mut self, path: &str) -> Result<Option<AnnexedContent>> {
        // Pointer blobs are small; anything larger is settled by the size
        // probe alone, without fetching content.
        let Some(size) = self.repo.blob_size(&self.commit, path)? else {
            return Ok(None);
        };
        if size > MAX_POINTER_LENGTH as u64 {
            return Ok(None);
        }
        let content = self.repo.blob_bytes(&self.commit, path)?;
        let Some(pointer) = PointerRecord::parse(&content) else {
            return Ok(None);
        };
        self.locate(pointer.into_key(), path).map(Some)
    }
}

/// Batch strategy: enumerate the annexed path set once per export through the
/// store's own tooling, then map each path to a key and each key to a content
/// location with per-path invocations.
pub struct AnnexCliResolver<'r> {
    repo: &'r Repository,
    commit: CommitId,
    annexed: BTreeSet<String>,
}

impl<'r> AnnexCliResolver<'r> {
    /// Enumerate annexed paths at the commit.
    ///
    /// # Errors
    ///
    /// Returns an error when the store tooling fails or emits non-UTF-8
    /// paths.
    pub fn new(repo: &'r Repository, commit: CommitId) -> Result<Self> {
        let output = repo.run_checked(
            &[
                "annex",
                "find",
                "--print0",
                &format!("--branch={commit}"),
            ],
            "enumerating annexed paths",
        )?;
        let listing = String::from_utf8(output.stdout)
            .context("annex path listing is not valid UTF-8")?;
        let annexed: BTreeSet<String> = listing
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(ToString::to_string)
            .collect();
        debug!(commit = %commit, annexed = annexed.len(), "enumerated annexed paths");
        Ok(Self {
            repo,
            commit,
            annexed,
        })
    }

    /// The enumerated annexed path set, in stable (sorted) order. The
    /// append-after archive flow iterates this after passing the base
    /// archive through.
    #[must_use]
    pub fn annexed_paths(&self) -> Vec<String> {
        self.annexed.iter().cloned().collect()
    }

    fn key_for(&self, path: &str) -> Result<AnnexKey> {
        let content = self.repo.blob_bytes(&self.commit, path)?;
        let pointer = PointerRecord::parse(&content).with_context(|| {
            format!("path {path} was enumerated as annexed but its blob is not a pointer")
        })?;
        Ok(pointer.into_key())
    }

    fn location_of(&self, key: &AnnexKey) -> Result<PathBuf> {
        let output = self.repo.run_checked(
            &["annex", "contentlocation", key.as_str()],
            &format!("locating content for key {key}"),
        )?;
        let relative = output.stdout_text().trim().to_string();
        if relative.is_empty() {
            bail!("store reported no content location for key {key}");
        }
        Ok(self.repo.path().join(relative))
    }
}

impl AnnexResolver for AnnexCliResolver<'_> {
    fn resolve(&mut self, path: &str) -> Result<Option<AnnexedContent>> {
        if !self.annexed.contains(path) {
            return Ok(None);
        }
        let key = self.key_for(path)?;
        let location = self.location_of(&key)?;
        stat_content(key, location, path).map(Some)
    }
}
