//! Subprocess orchestration.
//!
//! Every external invocation goes through one of two variants:
//!
//! - [`run_capture`] - blocking wait, captured stdout/stderr, for queries
//!   (`docker inspect`, `git rev-parse`, ...).
//! - [`run_inherit`] - blocking wait with inherited stdio, for builds and
//!   interactive attach/exec where output streams to the user's terminal.
//!
//! Both honor the cancellation model: SIGINT/SIGTERM reach the child through
//! the foreground process group; the parent waits for the child to exit and
//! reports the signal through [`ExitOutcome::Signalled`].

use std::io;
use std::path::Path;
use std::process::Command;

/// Captured result of a non-interactive subprocess.
#[derive(Debug)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// How an inherited-stdio subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    /// Terminated by a signal (Unix signal number).
    Signalled(i32),
}

impl ExitOutcome {
    /// Shell-convention exit code: 128 + signal number for signal deaths.
    pub fn as_code(self) -> i32 {
        match self {
            ExitOutcome::Code(code) => code,
            ExitOutcome::Signalled(sig) => 128 + sig,
        }
    }

    /// True when the child died to SIGINT or SIGTERM.
    pub fn cancelled(self) -> bool {
        matches!(self, ExitOutcome::Signalled(2) | ExitOutcome::Signalled(15))
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn build(program: &str, args: &[&str], cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd
}

/// Run a subprocess to completion, capturing stdout and stderr.
pub fn run_capture(program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Captured> {
    log::debug!("run: {}", command_line(program, args));
    let output = build(program, args, cwd).output()?;
    let captured = Captured {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: exit_outcome(&output.status).as_code(),
    };
    if !captured.success() {
        log::debug!(
            "exit {}: {}",
            captured.code,
            command_line(program, args)
        );
    }
    Ok(captured)
}

/// Run a subprocess with inherited stdio (terminal passthrough).
///
/// Used for builds (log streaming) and attach/exec (interactive TTY). The
/// wait is uninterruptible on our side: a SIGINT from the user hits the
/// child first, and we observe how it died.
pub fn run_inherit(program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<ExitOutcome> {
    log::debug!("run (inherit): {}", command_line(program, args));
    let status = build(program, args, cwd).status()?;
    Ok(exit_outcome(&status))
}

#[cfg(unix)]
fn exit_outcome(status: &std::process::ExitStatus) -> ExitOutcome {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitOutcome::Code(code),
        None => ExitOutcome::Signalled(status.signal().unwrap_or(0)),
    }
}

#[cfg(not(unix))]
fn exit_outcome(status: &std::process::ExitStatus) -> ExitOutcome {
    ExitOutcome::Code(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = run_capture("sh", &["-c", "echo hello; exit 0"], None).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.code, 0);
        assert!(out.success());
    }

    #[test]
    fn captures_stderr_on_failure() {
        let out = run_capture("sh", &["-c", "echo oops >&2; exit 3"], None).unwrap();
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.code, 3);
        assert!(!out.success());
    }

    #[test]
    fn respects_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_capture("pwd", &[], Some(dir.path())).unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }

    #[cfg(unix)]
    #[test]
    fn signal_death_maps_to_cancelled() {
        let out = run_inherit("sh", &["-c", "kill -INT $$"], None).unwrap();
        assert_eq!(out, ExitOutcome::Signalled(2));
        assert!(out.cancelled());
        assert_eq!(out.as_code(), 130);
    }

    #[test]
    fn plain_exit_is_not_cancelled() {
        assert!(!ExitOutcome::Code(1).cancelled());
        assert_eq!(ExitOutcome::Code(7).as_code(), 7);
    }
}
