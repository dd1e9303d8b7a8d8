//! Development environment launcher combining git worktrees, Docker, and
//! Buildx/Bake.
//!
//! `wtd` resolves a repository specifier (`owner/repo[@branch][#subfolder]`)
//! into three reconciled layers of state: a git worktree rooted in a shared
//! bare clone, a container image composed from a graph of extensions, and a
//! long-lived container attached to that worktree. It then attaches an
//! interactive shell or runs a one-shot command inside the container.
//!
//! The library API is not stable; it exists to serve the `wtd` and `wt`
//! binaries and their tests.

pub mod config;
pub mod docker;
pub mod error;
pub mod extension;
pub mod git;
pub mod layout;
pub mod plan;
pub mod process;
pub mod reconcile;
pub mod spec;
pub mod styling;

pub use error::{Result, WtdError};
pub use spec::RepoSpec;
