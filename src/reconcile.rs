//! The reconciler: drives observed state toward the requested goal state.
//!
//! One invocation reconciles one specifier. Phases are strictly ordered:
//! git operations complete before any build, build before create, create
//! before start, start before attach/exec. The dispatch table over
//! `(image current?, container state)` is pure ([`plan_actions`]) so the
//! state machine is testable without docker.
//!
//! | image | container | running | action |
//! |-------|-----------|---------|--------|
//! | no    | any       | any     | build, create, start |
//! | yes   | absent    | any     | create, start |
//! | yes   | present   | no      | start |
//! | yes   | present   | yes     | (attach/exec only) |
//!
//! A container whose `wtd.identity` label disagrees with the newly
//! computed plan identity is removed first, which folds `--rebuild` and
//! stale-image recreation into the same table.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, RepoConfig};
use crate::docker::{self, ContainerState};
use crate::error::{Result, WtdError};
use crate::extension::{Catalog, Extension, detect, resolve};
use crate::git::BareRepo;
use crate::layout::Layout;
use crate::plan::{self, BuildPlan};
use crate::process::{ExitOutcome, run_inherit};
use crate::spec::RepoSpec;
use crate::styling::{eprintln, println, progress_message, warning_message};

/// What to do once the workspace is ready.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Interactive shell inside the container.
    Attach,
    /// One-shot command inside the container; its exit code propagates.
    Run(Vec<String>),
    /// Stop after worktree readiness.
    NoContainer,
    /// Stop after worktree readiness, then run the command (or a shell)
    /// on the host inside the worktree.
    Host(Vec<String>),
}

/// Container actions in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Build,
    Create,
    Start,
}

/// The dispatch table as a pure function.
pub fn plan_actions(image_current: bool, state: ContainerState) -> Vec<Action> {
    if !image_current {
        // The stale-container case removes the container before this point,
        // so a missing image always means a fresh create.
        return vec![Action::Build, Action::Create, Action::Start];
    }
    match state {
        ContainerState::Absent => vec![Action::Create, Action::Start],
        ContainerState::Created | ContainerState::Exited => vec![Action::Start],
        ContainerState::Running => vec![],
    }
}

/// Reconcile the workspace for `spec` and then attach, exec, or stop
/// according to `mode`. Returns the process exit code.
pub fn launch(config: &Config, spec: &RepoSpec, mode: Mode) -> Result<i32> {
    let layout = Layout::new(config.cache_root.clone(), spec);

    std::fs::create_dir_all(layout.repo_dir()).map_err(|err| WtdError::GitFailure {
        cmd: "prepare workspace".to_string(),
        stderr: err.to_string(),
    })?;
    let _lock = WorkspaceLock::acquire(&layout.lock_path())?;

    if layout.legacy_worktree_dir().exists() {
        eprintln!(
            "{}",
            warning_message(&format!(
                "legacy worktree directory {} exists; using {}",
                layout.legacy_worktree_dir().display(),
                layout.worktree_dir().display()
            ))
        );
    }

    let bare = BareRepo::ensure(&layout, config, spec)?;
    let worktree = bare.ensure_worktree(&layout, spec)?;

    match &mode {
        Mode::Host(command) => return host_exec(&worktree, spec, command),
        Mode::NoContainer => {
            println!("{}", worktree.display());
            return Ok(0);
        }
        Mode::Attach | Mode::Run(_) => {}
    }

    let repo_config = RepoConfig::load(&worktree);
    let catalog = Catalog::load(Some(&worktree))?;
    let detected = detect::auto_detected(&catalog, &worktree);
    let roots = resolve::root_set(
        &catalog,
        &detected,
        &config.extensions,
        &repo_config.extensions,
        config,
    );
    let order = resolve::resolve(&catalog, &roots)?;
    let extensions: Vec<&Extension> = order
        .iter()
        .filter_map(|name| catalog.get(name))
        .collect();
    log::info!("extensions: {}", order.join(", "));

    let base_image = repo_config
        .base_image
        .clone()
        .unwrap_or_else(|| config.base_image.clone());
    // CLI flag beats repo config beats the built-in default.
    let platforms = config
        .platforms
        .clone()
        .or_else(|| repo_config.platforms.clone())
        .unwrap_or_else(|| {
            crate::config::DEFAULT_PLATFORMS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
    let salt = config.rebuild.then(rebuild_salt);

    let build_plan = BuildPlan::compute(&extensions, &base_image, salt.as_deref());
    let service = plan::service_description(spec, &layout, &extensions, build_plan.identity());
    plan::emit(&layout, spec, &build_plan, &service, config, &platforms).map_err(|err| {
        WtdError::BuildFailed {
            stderr: format!("failed to write build artifacts: {err}"),
        }
    })?;

    let name = layout.container_name().to_string();
    let mut state = docker::container_state(&name)?;
    if state != ContainerState::Absent {
        let container_identity = docker::container_label(&name, "wtd.identity")?;
        if container_identity.as_deref() != Some(build_plan.identity()) {
            log::info!("container {name} was built from a different stage identity, recreating");
            docker::remove_container(&name)?;
            state = ContainerState::Absent;
        }
    }

    let image_current =
        !config.rebuild && docker::image_present(&layout.identity_tag(build_plan.identity()))?;

    for action in plan_actions(image_current, state) {
        match action {
            Action::Build => {
                println!("{}", progress_message(&format!("building {}", layout.image_tag())));
                docker::build(&layout, config)?;
            }
            Action::Create => docker::create(&layout, &service)?,
            Action::Start => docker::start(&name)?,
        }
    }

    let workdir = Layout::container_workdir(spec);
    match mode {
        Mode::Attach => docker::attach(&name, &workdir),
        Mode::Run(command) => docker::exec(&name, &workdir, &command),
        Mode::NoContainer | Mode::Host(_) => unreachable!("handled before reconciliation"),
    }
}

/// Salt for `--rebuild`: wall-clock seconds, guaranteeing a fresh identity.
fn rebuild_salt() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "rebuild".to_string())
}

/// Run the command (or an interactive shell) on the host in the worktree.
fn host_exec(worktree: &Path, spec: &RepoSpec, command: &[String]) -> Result<i32> {
    let dir = match &spec.subfolder {
        Some(sub) => worktree.join(sub),
        None => worktree.to_path_buf(),
    };

    let outcome = if command.is_empty() {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "bash".to_string());
        run_inherit(&shell, &[], Some(&dir))
    } else if command.len() == 1 && command[0].contains(char::is_whitespace) {
        run_inherit("sh", &["-c", &command[0]], Some(&dir))
    } else {
        let args: Vec<&str> = command[1..].iter().map(String::as_str).collect();
        run_inherit(&command[0], &args, Some(&dir))
    };

    match outcome {
        Ok(outcome) if outcome.cancelled() => Err(WtdError::Cancelled),
        Ok(ExitOutcome::Code(code)) => Ok(code),
        Ok(outcome) => Ok(outcome.as_code()),
        Err(err) => Err(WtdError::ContainerFailure {
            op: "host exec".to_string(),
            stderr: err.to_string(),
        }),
    }
}

/// Prune artifacts. `scope` of `None` prunes everything under wtd's
/// management; otherwise only artifacts whose `wtd.spec` label matches the
/// given specifier. A scope without an explicit `@branch` covers every
/// branch of the repository; the shared bare clone is only removed by a
/// full prune.
pub fn prune(config: &Config, scope: Option<&str>) -> Result<i32> {
    match scope {
        Some(raw) => prune_scope(config, raw),
        None => prune_all(config),
    }
}

fn prune_scope(config: &Config, raw: &str) -> Result<i32> {
    let explicit_branch = raw.contains('@');
    let spec = RepoSpec::parse(raw)?;
    let layout = Layout::new(config.cache_root.clone(), &spec);

    // Containers: exact label for @branch scopes, all branches otherwise.
    let repo_prefix = format!("{}/{}@", spec.owner, spec.repo);
    for (name, label) in docker::managed_container_specs()? {
        let matches = if explicit_branch {
            label == spec.label()
        } else {
            label.starts_with(&repo_prefix)
        };
        if matches {
            println!("removing container {name}");
            docker::remove_container(&name)?;
        }
    }

    // Images by repository reference.
    let reference = if explicit_branch {
        layout.container_name().to_string()
    } else {
        format!("{}-*", spec.repo)
    };
    docker::remove_images(&reference)?;

    // Worktrees; the bare clone stays until a full prune.
    let bare_present = layout.bare_dir().exists();
    let bare = BareRepo::at(layout.bare_dir());
    let victims: Vec<PathBuf> = if explicit_branch {
        vec![layout.worktree_dir(), layout.legacy_worktree_dir()]
    } else {
        worktree_dirs(layout.repo_dir())
    };
    for dir in victims {
        if !dir.exists() {
            continue;
        }
        println!("removing worktree {}", dir.display());
        if bare_present && bare.remove_worktree(&dir).is_ok() {
            continue;
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
    if bare_present {
        let _ = bare.prune_worktrees();
        let _ = std::fs::remove_file(layout.lock_path());
    }

    Ok(0)
}

fn prune_all(config: &Config) -> Result<i32> {
    let mut removed = 0usize;
    for name in docker::managed_containers()? {
        println!("removing container {name}");
        docker::remove_container(&name)?;
        removed += 1;
    }
    docker::remove_labeled_images()?;

    let workspaces = config.cache_root.join("workspaces");
    if workspaces.exists() {
        println!("removing {}", workspaces.display());
        std::fs::remove_dir_all(&workspaces).map_err(|err| WtdError::ContainerFailure {
            op: "prune".to_string(),
            stderr: err.to_string(),
        })?;
    }

    if removed == 0 {
        println!("no wtd resources found to prune");
    }
    Ok(0)
}

/// Worktree directories under a repo dir, matching both the current
/// `worktree-*` and the legacy `wt-*` naming.
fn worktree_dirs(repo_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(repo_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with("worktree-") || name.starts_with("wt-")
        })
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// Best-effort advisory lock: one reconciling invocation per worktree.
#[derive(Debug)]
struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    fn acquire(path: &Path) -> Result<WorkspaceLock> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(WorkspaceLock {
                path: path.to_path_buf(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(WtdError::Busy {
                path: path.to_path_buf(),
            }),
            // A lock that cannot be created (read-only cache, exotic fs)
            // must not block the launch; mutual exclusion is best-effort.
            Err(err) => {
                log::warn!("cannot create lock {}: {err}", path.display());
                Ok(WorkspaceLock {
                    path: PathBuf::new(),
                })
            }
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if !self.path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_builds_creates_starts() {
        for state in [
            ContainerState::Absent,
            ContainerState::Created,
            ContainerState::Running,
            ContainerState::Exited,
        ] {
            assert_eq!(
                plan_actions(false, state),
                vec![Action::Build, Action::Create, Action::Start]
            );
        }
    }

    #[test]
    fn current_image_missing_container_creates_and_starts() {
        assert_eq!(
            plan_actions(true, ContainerState::Absent),
            vec![Action::Create, Action::Start]
        );
    }

    #[test]
    fn stopped_container_only_starts() {
        assert_eq!(
            plan_actions(true, ContainerState::Exited),
            vec![Action::Start]
        );
        assert_eq!(
            plan_actions(true, ContainerState::Created),
            vec![Action::Start]
        );
    }

    #[test]
    fn running_container_needs_no_action() {
        assert_eq!(plan_actions(true, ContainerState::Running), vec![]);
    }

    #[test]
    fn lock_contention_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".worktree-main.lock");

        let first = WorkspaceLock::acquire(&path).unwrap();
        let err = WorkspaceLock::acquire(&path).unwrap_err();
        let WtdError::Busy { path: reported } = &err else {
            panic!("expected Busy, got {err:?}");
        };
        assert_eq!(reported, &path);
        assert_eq!(err.exit_code(), 6);

        drop(first);
        // Released on drop; a new invocation may proceed.
        WorkspaceLock::acquire(&path).unwrap();
    }

    #[test]
    fn worktree_dirs_matches_current_and_legacy_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("worktree-main")).unwrap();
        std::fs::create_dir(dir.path().join("wt-dev")).unwrap();
        std::fs::create_dir(dir.path().join("bare")).unwrap();
        std::fs::write(dir.path().join("worktree-file"), "").unwrap();

        let dirs = worktree_dirs(dir.path());
        let names: Vec<String> = dirs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        // Byte order: '-' sorts before 'r', so the legacy name comes first.
        assert_eq!(names, vec!["wt-dev", "worktree-main"]);
    }

    #[test]
    fn host_exec_runs_command_in_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RepoSpec::parse("a/b").unwrap();
        let code = host_exec(dir.path(), &spec, &["true".to_string()]).unwrap();
        assert_eq!(code, 0);

        let code = host_exec(dir.path(), &spec, &["false".to_string()]).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn host_exec_routes_shell_lines_through_sh() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RepoSpec::parse("a/b").unwrap();
        let code = host_exec(dir.path(), &spec, &["exit 7".to_string()]).unwrap();
        assert_eq!(code, 7);
    }
}
