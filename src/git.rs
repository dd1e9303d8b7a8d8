//! Git coordination: bare clones and branch worktrees.
//!
//! One bare clone per `<owner>/<repo>` serves as the shared object store;
//! each branch gets a named worktree next to it. The coordinator only ever
//! creates or refreshes; destroying a worktree is the prune command's job.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Result, WtdError};
use crate::layout::Layout;
use crate::process::run_capture;
use crate::spec::RepoSpec;
use crate::styling::{eprintln, warning_message};

/// A bare repository context; all git commands run with `-C <bare>`.
#[derive(Debug, Clone)]
pub struct BareRepo {
    path: PathBuf,
}

/// Derive the clone URL from the configured template.
pub fn remote_url(template: &str, spec: &RepoSpec) -> String {
    template
        .replace("{owner}", &spec.owner)
        .replace("{repo}", &spec.repo)
}

impl BareRepo {
    /// Wrap an existing bare clone without touching the network.
    pub fn at(path: impl Into<PathBuf>) -> BareRepo {
        BareRepo { path: path.into() }
    }

    /// Ensure the bare clone exists and is fresh: clone when absent, fetch
    /// (with prune) when present. A fetch failure with an existing bare
    /// downgrades to a warning so offline work keeps going.
    pub fn ensure(layout: &Layout, config: &Config, spec: &RepoSpec) -> Result<BareRepo> {
        let path = layout.bare_dir();
        let url = remote_url(&config.remote_template, spec);

        if !path.exists() {
            log::info!("cloning bare repository {url}");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| WtdError::GitFailure {
                    cmd: "clone --bare".to_string(),
                    stderr: err.to_string(),
                })?;
            }
            let out = git(
                None,
                &["clone", "--bare", &url, &path.to_string_lossy()],
            )?;
            if !out.success() {
                return Err(WtdError::GitFailure {
                    cmd: "clone --bare".to_string(),
                    stderr: out.stderr,
                });
            }
            // Bare clones get no fetch refspec; set one so later fetches
            // update branch refs instead of only FETCH_HEAD.
            let repo = BareRepo { path: path.clone() };
            repo.run(&[
                "config",
                "remote.origin.fetch",
                "+refs/heads/*:refs/heads/*",
            ])?;
        } else {
            log::info!("fetching updates for {url}");
            let repo = BareRepo { path: path.clone() };
            let out = repo.run(&["fetch", "--prune", "origin"])?;
            if !out.success() {
                eprintln!(
                    "{}",
                    warning_message(&format!(
                        "fetch failed, continuing with cached objects: {}",
                        out.stderr.trim()
                    ))
                );
            }
        }

        Ok(BareRepo { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the branch worktree exists and is registered.
    ///
    /// - registered at the expected path: reuse;
    /// - directory present but unregistered: [`WtdError::WorktreeConflict`];
    /// - branch missing locally and remotely: create it from the default
    ///   branch and push upstream (push failure is a warning).
    pub fn ensure_worktree(&self, layout: &Layout, spec: &RepoSpec) -> Result<PathBuf> {
        let target = layout.worktree_dir();

        if let Some(registered) = self.worktree_registered_at(&target)? {
            log::info!("reusing worktree {}", registered.display());
            return Ok(registered);
        }
        if target.exists() {
            return Err(WtdError::WorktreeConflict { path: target });
        }

        let branch = &spec.branch;
        if self.branch_exists(branch)? {
            log::info!("creating worktree for existing branch {branch}");
            self.run_checked(
                &["worktree", "add", &target.to_string_lossy(), branch],
                "worktree add",
            )?;
        } else {
            let base = self.default_branch();
            log::info!("branch {branch} not found, creating from {base}");
            self.run_checked(
                &[
                    "worktree",
                    "add",
                    "-b",
                    branch,
                    &target.to_string_lossy(),
                    &base,
                ],
                "worktree add -b",
            )?;
            let push = self.run(&["push", "--set-upstream", "origin", branch])?;
            if !push.success() {
                eprintln!(
                    "{}",
                    warning_message(&format!(
                        "could not push new branch {branch} upstream: {}",
                        push.stderr.trim()
                    ))
                );
            }
        }

        Ok(target)
    }

    /// Check whether a branch exists locally or on the remote.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let local = self.run(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])?;
        if local.success() {
            return Ok(true);
        }
        let remote = self.run(&[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("refs/remotes/origin/{branch}"),
        ])?;
        Ok(remote.success())
    }

    /// The repository's default branch. Tries the local `origin/HEAD`
    /// symref first, then asks the remote; falls back to `main`.
    pub fn default_branch(&self) -> String {
        if let Ok(out) = self.run(&["symbolic-ref", "--quiet", "refs/remotes/origin/HEAD"])
            && out.success()
            && let Some(branch) = out.stdout.trim().strip_prefix("refs/remotes/origin/")
        {
            return branch.to_string();
        }
        if let Ok(out) = self.run(&["ls-remote", "--symref", "origin", "HEAD"])
            && out.success()
            && let Some(branch) = parse_remote_default_branch(&out.stdout)
        {
            return branch;
        }
        "main".to_string()
    }

    /// Paths of all registered worktrees (the bare entry excluded).
    pub fn list_worktrees(&self) -> Result<Vec<PathBuf>> {
        let out = self.run_checked(&["worktree", "list", "--porcelain"], "worktree list")?;
        Ok(parse_worktree_paths(&out.stdout))
    }

    /// Remove a worktree registration and its directory.
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.run_checked(
            &["worktree", "remove", "--force", &path.to_string_lossy()],
            "worktree remove",
        )?;
        Ok(())
    }

    /// Drop stale worktree registrations whose directories are gone.
    pub fn prune_worktrees(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"], "worktree prune")?;
        Ok(())
    }

    fn worktree_registered_at(&self, target: &Path) -> Result<Option<PathBuf>> {
        for path in self.list_worktrees()? {
            if paths_equal(&path, target) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn run(&self, args: &[&str]) -> Result<crate::process::Captured> {
        let mut full = vec!["-C", self.path.to_str().unwrap_or(".")];
        full.extend_from_slice(args);
        run_capture("git", &full, None).map_err(|err| WtdError::GitFailure {
            cmd: args.join(" "),
            stderr: err.to_string(),
        })
    }

    fn run_checked(&self, args: &[&str], op: &str) -> Result<crate::process::Captured> {
        let out = self.run(args)?;
        if !out.success() {
            return Err(WtdError::GitFailure {
                cmd: op.to_string(),
                stderr: out.stderr,
            });
        }
        Ok(out)
    }
}

fn git(cwd: Option<&Path>, args: &[&str]) -> Result<crate::process::Captured> {
    run_capture("git", args, cwd).map_err(|err| WtdError::GitFailure {
        cmd: args.join(" "),
        stderr: err.to_string(),
    })
}

/// Compare two paths, tolerating symlink differences when both exist.
fn paths_equal(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Extract the default branch from `ls-remote --symref origin HEAD` output:
///
/// ```text
/// ref: refs/heads/main\tHEAD
/// 85a1ce7c...\tHEAD
/// ```
fn parse_remote_default_branch(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.strip_prefix("ref: ")
            .and_then(|symref| symref.split_once('\t'))
            .map(|(ref_path, _)| ref_path)
            .and_then(|ref_path| ref_path.strip_prefix("refs/heads/"))
            .map(str::to_string)
    })
}

/// Parse worktree paths from `git worktree list --porcelain`, skipping the
/// bare repository entry.
fn parse_worktree_paths(output: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut current: Option<PathBuf> = None;
    let mut bare = false;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(path) = current.take()
                && !bare
            {
                paths.push(path);
            }
            bare = false;
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            current = Some(PathBuf::from(path));
        } else if line == "bare" {
            bare = true;
        }
    }
    if let Some(path) = current
        && !bare
    {
        paths.push(path);
    }
    paths
}
