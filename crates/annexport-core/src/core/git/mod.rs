use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};
use tracing::debug;

use annexport_domain::{CommitId, FileMode, TreeEntry};

use crate::core::process::{run_command, RunOutput};

mod source;

pub use source::ArchiveProducer;

/// Environment override for the version control executable, mirroring the
/// usual tool-resolution order: explicit override first, then PATH lookup.
const GIT_ENV: &str = "ANNEXPORT_GIT";

/// Narrow handle onto an on-disk repository.
///
/// Only the operations the export pipeline consumes are exposed: commit
/// resolution, blob access, a recursive tree listing, and spawning the
/// archive producer. Anything wider belongs to the tool itself.
#[derive(Clone, Debug)]
pub struct Repository {
    path: PathBuf,
    git: PathBuf,
}

impl Repository {
    /// Open a repository working directory or bare repository.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is not a directory or no git executable
    /// can be located.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            bail!("repository path {} is not a directory", path.display());
        }
        let git = locate_git()?;
        debug!(repo = %path.display(), git = %git.display(), "opened repository");
        Ok(Self { path, git })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Repository name used for archive prefixes: the directory basename with
    /// a `.git` suffix trimmed, so `/srv/repos/data.git` becomes `data`.
    #[must_use]
    pub fn name(&self) -> String {
        let raw = self.path.as_os_str().to_string_lossy();
        let trimmed = raw.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        Path::new(trimmed)
            .file_name()
            .map_or_else(|| "repository".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Resolve a commit-ish spec to a full commit id; `Ok(None)` when the
    /// spec names nothing.
    pub fn resolve_commit(&self, spec: &str) -> Result<Option<CommitId>> {
        let output = self.run(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("{spec}^{{commit}}"),
        ])?;
        if !output.success() {
            return Ok(None);
        }
        let id = output.stdout_text().trim().to_string();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(CommitId::new(id)))
    }

    /// Size of the blob at `commit:path`, or `None` when no blob lives there.
    pub fn blob_size(&self, commit: &CommitId, path: &str) -> Result<Option<u64>> {
        let output = self.run(&["cat-file", "-s", &format!("{commit}:{path}")])?;
        if !output.success() {
            return Ok(None);
        }
        let size = output
            .stdout_text()
            .trim()
            .parse::<u64>()
            .with_context(|| format!("unparsable blob size for {path}"))?;
        Ok(Some(size))
    }

    /// Raw content of the blob at `commit:path`.
    pub fn blob_bytes(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>> {
        let output = self.run_checked(
            &["cat-file", "blob", &format!("{commit}:{path}")],
            &format!("reading blob {path}"),
        )?;
        Ok(output.stdout)
    }

    /// Recursive listing of all blobs reachable from the commit's tree.
    pub fn list_tree(&self, commit: &CommitId) -> Result<Vec<TreeEntry>> {
        let output = self.run_checked(
            &["ls-tree", "-r", "-z", "--long", commit.as_str()],
            "listing tree",
        )?;
        let text = output.stdout_text();
        let mut entries = Vec::new();
        for record in text.split('\0').filter(|r| !r.is_empty()) {
            let (meta, path) = record
                .split_once('\t')
                .with_context(|| format!("malformed tree record {record:?}"))?;
            let mut fields = meta.split_whitespace();
            let (mode, kind, oid, size) = (
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
            );
            if kind != "blob" {
                continue;
            }
            let Some(mode) = FileMode::from_octal(mode) else {
                continue;
            };
            entries.push(TreeEntry {
                path: path.to_string(),
                oid: oid.to_string(),
                mode,
                size: size.parse().unwrap_or(0),
            });
        }
        Ok(entries)
    }

    /// Absolute path of the repository's git directory, where the annex
    /// object store lives.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let output = self.run_checked(&["rev-parse", "--absolute-git-dir"], "locating git dir")?;
        Ok(PathBuf::from(output.stdout_text().trim()))
    }

    pub(crate) fn run(&self, args: &[&str]) -> Result<RunOutput> {
        run_command(&self.git, args, &self.path)
    }

    pub(crate) fn run_checked(&self, args: &[&str], what: &str) -> Result<RunOutput> {
        let output = self.run(args)?;
        if !output.success() {
            bail!(
                "{what} failed in {}: git exited with {}: {}",
                self.path.display(),
                output.code,
                output.stderr.trim()
            );
        }
        Ok(output)
    }

    /// A command builder rooted in the repository, for callers that manage
    /// their own process lifecycle (the archive producer).
    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.git);
        command.current_dir(&self.path);
        command
    }
}

fn locate_git() -> Result<PathBuf> {
    if let Some(overridden) = env::var_os(GIT_ENV) {
        return Ok(PathBuf::from(overridden));
    }
    which::which("git").context("git executable not found on PATH")
}
