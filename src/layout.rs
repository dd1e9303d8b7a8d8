//! On-disk path model.
//!
//! Pure derivation of every path and identifier from `(cache_root, spec)`.
//! No I/O happens here; the reconciler and coordinators consume these paths.
//!
//! Layout under the cache root (default `~/.wtd`):
//!
//! ```text
//! <cache>/workspaces/<owner>/<repo>/bare
//! <cache>/workspaces/<owner>/<repo>/worktree-<safe-branch>
//! ```
//!
//! Generated build artifacts live in the worktree root: `Dockerfile`,
//! `docker-compose.yml`, `docker-bake.hcl`, and `.buildx-cache/`.

use std::path::{Path, PathBuf};

use crate::spec::RepoSpec;

/// The generated artifact filenames, in emission order.
pub const GENERATED_FILES: [&str; 3] = ["Dockerfile", "docker-compose.yml", "docker-bake.hcl"];

/// Name of the local buildx cache directory inside the worktree.
pub const BUILDX_CACHE_DIR: &str = ".buildx-cache";

/// All on-disk paths and runtime identifiers for one specifier.
#[derive(Debug, Clone)]
pub struct Layout {
    cache_root: PathBuf,
    repo_dir: PathBuf,
    worktree_name: String,
    container_name: String,
}

impl Layout {
    pub fn new(cache_root: impl Into<PathBuf>, spec: &RepoSpec) -> Layout {
        let cache_root = cache_root.into();
        let repo_dir = cache_root
            .join("workspaces")
            .join(&spec.owner)
            .join(&spec.repo);
        Layout {
            cache_root,
            repo_dir,
            worktree_name: format!("worktree-{}", spec.safe_branch()),
            container_name: spec.container_name(),
        }
    }

    /// The cache root this layout was derived from.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// `<cache>/workspaces`
    pub fn workspaces_dir(&self) -> PathBuf {
        self.cache_root.join("workspaces")
    }

    /// `<cache>/workspaces/<owner>/<repo>`
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// The shared bare clone: `<repo-dir>/bare`.
    pub fn bare_dir(&self) -> PathBuf {
        self.repo_dir.join("bare")
    }

    /// Registered name of the worktree: `worktree-<safe-branch>`.
    pub fn worktree_name(&self) -> &str {
        &self.worktree_name
    }

    /// The branch worktree: `<repo-dir>/worktree-<safe-branch>`.
    pub fn worktree_dir(&self) -> PathBuf {
        self.repo_dir.join(&self.worktree_name)
    }

    /// Legacy worktree directory (`wt-<safe-branch>`) written by older
    /// versions; prune still matches it.
    pub fn legacy_worktree_dir(&self) -> PathBuf {
        let legacy = self
            .worktree_name
            .strip_prefix("worktree-")
            .map(|branch| format!("wt-{branch}"))
            .unwrap_or_else(|| self.worktree_name.clone());
        self.repo_dir.join(legacy)
    }

    /// Container (and image repository) name.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Moving image tag: `<container-name>:latest`.
    pub fn image_tag(&self) -> String {
        format!("{}:latest", self.container_name)
    }

    /// Identity-pinned image tag for a computed stage identity.
    pub fn identity_tag(&self, identity: &str) -> String {
        format!("{}:id-{identity}", self.container_name)
    }

    /// Generated Dockerfile path inside the worktree.
    pub fn dockerfile_path(&self) -> PathBuf {
        self.worktree_dir().join("Dockerfile")
    }

    /// Generated compose file path inside the worktree.
    pub fn compose_path(&self) -> PathBuf {
        self.worktree_dir().join("docker-compose.yml")
    }

    /// Generated bake file path inside the worktree.
    pub fn bake_path(&self) -> PathBuf {
        self.worktree_dir().join("docker-bake.hcl")
    }

    /// Local buildx cache directory inside the worktree.
    pub fn buildx_cache_dir(&self) -> PathBuf {
        self.worktree_dir().join(BUILDX_CACHE_DIR)
    }

    /// Per-worktree advisory lock file (lives next to the worktree so a
    /// full prune clears it).
    pub fn lock_path(&self) -> PathBuf {
        self.repo_dir.join(format!(".{}.lock", self.worktree_name))
    }

    /// The worktree's private ignore file under the bare clone
    /// (`bare/worktrees/<name>/info/exclude`). Generated artifacts are
    /// listed here so the user's `.gitignore` is never touched.
    pub fn worktree_exclude_path(&self) -> PathBuf {
        self.bare_dir()
            .join("worktrees")
            .join(&self.worktree_name)
            .join("info")
            .join("exclude")
    }

    /// Working directory inside the container: `/workspace[/subfolder]`.
    pub fn container_workdir(spec: &RepoSpec) -> String {
        match &spec.subfolder {
            Some(sub) => format!("/workspace/{sub}"),
            None => "/workspace".to_string(),
        }
    }
}

/// Resolve the cache root: `WTD_CACHE_DIR` if set, else `~/.wtd`.
pub fn default_cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("WTD_CACHE_DIR")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wtd")
}

/// Format a path for user-facing output, shortening the home prefix to `~`.
pub fn display_path(path: &Path) -> String {
    if let Some(home) = home::home_dir()
        && let Ok(stripped) = path.strip_prefix(&home)
    {
        if stripped.as_os_str().is_empty() {
            return "~".to_string();
        }
        return format!("~/{}", stripped.display());
    }
    path.display().to_string()
}
