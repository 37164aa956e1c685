use std::{
    io::{self, Read},
    panic::{catch_unwind, AssertUnwindSafe},
    process::{Child, ChildStdout, Stdio},
    sync::mpsc::{self, Receiver},
    thread,
};

use anyhow::{bail, Context, Result};
use tracing::debug;

use annexport_domain::CommitId;

use super::Repository;

/// Background producer of a plain (uncompressed, unsubstituted) archive.
///
/// The external tool streams the container through its stdout pipe; stderr is
/// collected on a helper thread whose outcome travels over a single-slot
/// channel, so a failing or panicking collector always surfaces in
/// [`ArchiveProducer::finish`]. Dropping an unfinished producer kills the
/// child and reaps it, which closes both pipe ends on every exit path.
pub struct ArchiveProducer {
    child: Child,
    stdout: ChildStdout,
    stderr_slot: Receiver<Result<String>>,
    describe: String,
    finished: bool,
}

impl ArchiveProducer {
    /// Spawn `git archive` for a resolved commit.
    ///
    /// `container` is the plain base format (`tar` or `zip`); compression and
    /// substitution happen downstream.
    ///
    /// # Errors
    ///
    /// Returns an error when the process cannot be spawned. A failing exit is
    /// reported by [`ArchiveProducer::finish`], after the stream is drained.
    pub fn spawn(
        repo: &Repository,
        container: &str,
        prefix: &str,
        commit: &CommitId,
    ) -> Result<Self> {
        let mut command = repo.command();
        command.arg("archive");
        if !prefix.is_empty() {
            command.arg(format!("--prefix={prefix}"));
        }
        command.arg(format!("--format={container}"));
        command.arg(commit.as_str());
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let describe = format!("git archive --format={container} {commit}");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {describe}"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("stdout missing for {describe}"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("stderr missing for {describe}"))?;

        let (sender, stderr_slot) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<String> {
                let mut buffer = String::new();
                stderr.read_to_string(&mut buffer)?;
                Ok(buffer)
            }))
            .unwrap_or_else(|_| bail!("archive producer stderr collector panicked"));
            let _ = sender.send(outcome);
        });

        debug!(producer = %describe, "spawned archive producer");
        Ok(Self {
            child,
            stdout,
            stderr_slot,
            describe,
            finished: false,
        })
    }

    /// The pipe carrying the produced archive bytes.
    pub fn stream(&mut self) -> &mut ChildStdout {
        &mut self.stdout
    }

    /// Drain whatever the consumer left unread (a concurrently streaming
    /// producer must never be left blocked on a full pipe), reap the child,
    /// and fail with the collected stderr on a nonzero exit.
    ///
    /// # Errors
    ///
    /// Returns an error when draining fails, the child cannot be reaped, the
    /// stderr collector died, or the tool exited with failure.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        io::copy(&mut self.stdout, &mut io::sink())
            .with_context(|| format!("draining {}", self.describe))?;
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to wait for {}", self.describe))?;
        let stderr = self
            .stderr_slot
            .recv()
            .map_err(|_| anyhow::anyhow!("stderr collector for {} vanished", self.describe))??;
        if !status.success() {
            bail!(
                "{} exited with {}: {}",
                self.describe,
                status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl Drop for ArchiveProducer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
