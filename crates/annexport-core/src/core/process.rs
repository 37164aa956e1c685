use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{Context, Result};

/// Captured result of a finished subprocess.
///
/// stdout stays raw bytes because several callers read object content through
/// it; stderr is only ever surfaced in error messages and is decoded lossily.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Execute a program and capture stdout/stderr.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams
/// cannot be read entirely.
pub fn run_command(program: &Path, args: &[&str], cwd: &Path) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let program_name = program.display().to_string();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {program_name}"))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {program_name}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr missing for {program_name}"))?;

    // Both streams are drained concurrently so the child never stalls on a
    // full pipe while the parent is blocked on the other stream.
    let stderr_handle = thread::spawn(move || -> Result<String> {
        let mut buffer = String::new();
        let mut reader = stderr;
        reader.read_to_string(&mut buffer)?;
        Ok(buffer)
    });

    let mut captured = Vec::new();
    stdout
        .read_to_end(&mut captured)
        .with_context(|| format!("failed to read stdout of {program_name}"))?;

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program_name}"))?;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stderr thread panicked"))??;

    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout: captured,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[cfg(unix)]
    #[test]
    fn run_command_captures_output_and_status_unix() -> Result<()> {
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c", "printf out && printf err >&2; exit 7"],
            Path::new("."),
        )?;
        assert_eq!(output.code, 7);
        assert!(!output.success());
        assert_eq!(output.stdout_text(), "out");
        assert_eq!(output.stderr, "err");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_command_keeps_stdout_binary() -> Result<()> {
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c", r"printf '\000\001\377'"],
            Path::new("."),
        )?;
        assert_eq!(output.code, 0);
        assert_eq!(output.stdout, vec![0x00, 0x01, 0xff]);
        Ok(())
    }

    #[test]
    fn run_command_reports_missing_program() {
        let result = run_command(
            Path::new("/definitely/not/a/program"),
            &[],
            Path::new("."),
        );
        assert!(result.is_err());
    }
}
