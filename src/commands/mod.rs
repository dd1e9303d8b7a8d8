//! One handler per invocation mode.

mod install;

pub use install::handle_install;

use anyhow::Result;
use color_print::cformat;

use wtd::config::Config;
use wtd::docker;
use wtd::extension::Catalog;
use wtd::process::run_capture;
use wtd::reconcile::{self, Mode};
use wtd::spec::RepoSpec;
use wtd::styling::{ERROR_EMOJI, GREEN, SUCCESS_EMOJI, println};

/// Launch (the default mode): reconcile worktree, image, and container,
/// then attach or run the command.
pub fn handle_launch(
    config: &Config,
    raw_spec: &str,
    command: &[String],
    host: bool,
) -> Result<i32> {
    let spec = RepoSpec::parse(raw_spec)?;
    let mode = if host {
        Mode::Host(command.to_vec())
    } else if config.no_container {
        Mode::NoContainer
    } else if command.is_empty() {
        Mode::Attach
    } else {
        Mode::Run(command.to_vec())
    };
    Ok(reconcile::launch(config, &spec, mode)?)
}

/// `--list`: show wtd-managed containers.
pub fn handle_list() -> Result<i32> {
    let containers = docker::list_managed()?;
    if containers.is_empty() {
        println!("No active environments.");
        return Ok(0);
    }
    println!("{}", cformat!("<bold>Active environments:</bold>"));
    for container in containers {
        println!(
            "  {}  {GREEN}{}{GREEN:#}  {}",
            container.name, container.state, container.image
        );
    }
    Ok(0)
}

/// `--prune [spec]`.
pub fn handle_prune(config: &Config, scope: &str) -> Result<i32> {
    let scope = (!scope.is_empty()).then_some(scope);
    Ok(reconcile::prune(config, scope)?)
}

/// `--ext-list`: print the effective catalog. Runs without a worktree, so
/// only built-ins (and no repo-local shadows) appear.
pub fn handle_ext_list() -> Result<i32> {
    let catalog = Catalog::load(None)?;
    println!("{}", cformat!("<bold>Available extensions:</bold>"));
    for ext in catalog.iter() {
        let mut notes = Vec::new();
        if ext.manifest.always_load {
            notes.push("always".to_string());
        }
        if !ext.manifest.dependencies.is_empty() {
            notes.push(format!("needs {}", ext.manifest.dependencies.join(", ")));
        }
        let suffix = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join("; "))
        };
        println!("  {:<12} {}{suffix}", ext.name(), ext.manifest.description);
    }
    Ok(0)
}

/// `--doctor`: probe the external collaborators.
pub fn handle_doctor() -> Result<i32> {
    let probes: [(&str, &[&str]); 4] = [
        ("docker", &["--version"]),
        ("docker compose", &["compose", "version"]),
        ("docker buildx", &["buildx", "version"]),
        ("git", &["--version"]),
    ];

    let mut all_good = true;
    for (name, args) in probes {
        let program = if name.starts_with("docker") {
            "docker"
        } else {
            "git"
        };
        let ok = run_capture(program, args, None)
            .map(|out| out.success())
            .unwrap_or(false);
        if ok {
            println!("{SUCCESS_EMOJI} {name}");
        } else {
            println!("{ERROR_EMOJI} {name}");
            all_good = false;
        }
    }
    Ok(if all_good { 0 } else { 1 })
}
