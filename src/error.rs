//! wtd error types and exit-code mapping.
//!
//! `WtdError` is a typed enum for domain errors that can be pattern-matched
//! and tested. Display produces the user-facing message; `exit_code()` maps
//! each kind onto the documented process exit codes:
//!
//! - 2: usage (handled by clap before any `WtdError` exists)
//! - 3: specifier / catalog / manifest / resolution errors
//! - 4: git failures
//! - 5: build failures
//! - 6: container failures (and lock contention)
//! - 130: cancelled by signal

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WtdError>;

#[derive(Debug, Clone)]
pub enum WtdError {
    /// The repository specifier did not match `owner/repo[@branch][#subfolder]`.
    MalformedSpec { input: String, reason: String },

    /// The effective extension catalog is unusable as a whole.
    CatalogInvalid { reason: String },

    /// A single extension manifest failed to parse or validate.
    ManifestInvalid { path: PathBuf, reason: String },

    /// An extension names a dependency that is not in the effective catalog.
    DependencyMissing {
        extension: String,
        dependency: String,
    },

    /// The dependency graph contains a cycle; `path` lists the names along
    /// the discovered back edge.
    DependencyCycle { path: Vec<String> },

    /// Two extensions in the resolved closure exclude each other.
    IncompatibleExtensions { a: String, b: String },

    /// A directory exists where a worktree should go but git does not know it.
    WorktreeConflict { path: PathBuf },

    /// A git subprocess exited non-zero.
    GitFailure { cmd: String, stderr: String },

    /// The build engine exited non-zero.
    BuildFailed { stderr: String },

    /// A container operation failed.
    ContainerFailure { op: String, stderr: String },

    /// Another invocation holds the workspace lock.
    Busy { path: PathBuf },

    /// A subprocess was terminated by SIGINT/SIGTERM.
    Cancelled,
}

impl WtdError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            WtdError::MalformedSpec { .. }
            | WtdError::CatalogInvalid { .. }
            | WtdError::ManifestInvalid { .. }
            | WtdError::DependencyMissing { .. }
            | WtdError::DependencyCycle { .. }
            | WtdError::IncompatibleExtensions { .. } => 3,
            WtdError::WorktreeConflict { .. } | WtdError::GitFailure { .. } => 4,
            WtdError::BuildFailed { .. } => 5,
            WtdError::ContainerFailure { .. } | WtdError::Busy { .. } => 6,
            WtdError::Cancelled => 130,
        }
    }
}

impl std::fmt::Display for WtdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WtdError::MalformedSpec { input, reason } => {
                write!(f, "malformed spec '{input}': {reason}")
            }
            WtdError::CatalogInvalid { reason } => {
                write!(f, "invalid extension catalog: {reason}")
            }
            WtdError::ManifestInvalid { path, reason } => {
                write!(f, "invalid manifest {}: {reason}", path.display())
            }
            WtdError::DependencyMissing {
                extension,
                dependency,
            } => {
                write!(
                    f,
                    "extension '{extension}' depends on '{dependency}', which is not in the catalog"
                )
            }
            WtdError::DependencyCycle { path } => {
                write!(f, "extension dependency cycle: {}", path.join(" -> "))
            }
            WtdError::IncompatibleExtensions { a, b } => {
                write!(f, "extensions '{a}' and '{b}' cannot be loaded together")
            }
            WtdError::WorktreeConflict { path } => {
                write!(
                    f,
                    "{} exists but is not a registered worktree; move it aside or prune",
                    path.display()
                )
            }
            WtdError::GitFailure { cmd, stderr } => {
                write!(f, "git {cmd} failed")?;
                if !stderr.trim().is_empty() {
                    write!(f, "\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            WtdError::BuildFailed { stderr } => {
                write!(f, "image build failed")?;
                if !stderr.trim().is_empty() {
                    write!(f, "\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            WtdError::ContainerFailure { op, stderr } => {
                write!(f, "docker {op} failed")?;
                if !stderr.trim().is_empty() {
                    write!(f, "\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            WtdError::Busy { path } => {
                write!(
                    f,
                    "another wtd invocation holds the lock at {}",
                    path.display()
                )
            }
            WtdError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for WtdError {}

/// Exit code for an error crossing the binary boundary: typed errors map
/// through [`WtdError::exit_code`], anything else is a plain failure.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<WtdError>()
        .map(WtdError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_documented_table() {
        let spec_err = WtdError::MalformedSpec {
            input: "x".into(),
            reason: "r".into(),
        };
        assert_eq!(spec_err.exit_code(), 3);
        assert_eq!(
            WtdError::DependencyCycle { path: vec![] }.exit_code(),
            3
        );
        assert_eq!(
            WtdError::WorktreeConflict {
                path: PathBuf::from("/tmp/x")
            }
            .exit_code(),
            4
        );
        assert_eq!(
            WtdError::GitFailure {
                cmd: "fetch".into(),
                stderr: String::new()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            WtdError::BuildFailed {
                stderr: String::new()
            }
            .exit_code(),
            5
        );
        assert_eq!(
            WtdError::ContainerFailure {
                op: "create".into(),
                stderr: String::new()
            }
            .exit_code(),
            6
        );
        assert_eq!(WtdError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn git_failure_includes_stderr_verbatim() {
        let err = WtdError::GitFailure {
            cmd: "clone --bare".into(),
            stderr: "fatal: repository not found\n".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("git clone --bare failed"));
        assert!(msg.contains("fatal: repository not found"));
    }

    #[test]
    fn anyhow_boundary_preserves_exit_codes() {
        let err: anyhow::Error = WtdError::Cancelled.into();
        assert_eq!(exit_code(&err), 130);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&plain), 1);
    }

    #[test]
    fn cycle_display_shows_path() {
        let err = WtdError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "extension dependency cycle: a -> b -> a"
        );
    }
}
