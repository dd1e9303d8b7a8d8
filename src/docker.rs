//! Container supervision: queries and actions against the docker CLI.
//!
//! Observables are cheap queries (`image_present`, `container_state`);
//! actions are the build/create/start/attach/exec/prune operations the
//! reconciler sequences. Docker remains the authoritative state holder:
//! every mutation is preceded by a query, never by cached assumptions.

use serde_yaml::{Mapping, Value};

use crate::config::Config;
use crate::error::{Result, WtdError};
use crate::extension::detect::expand_home;
use crate::layout::Layout;
use crate::process::{Captured, ExitOutcome, run_capture, run_inherit};

/// Label present on every wtd-managed container and image.
pub const MANAGED_LABEL: &str = "wtd=1";

/// Observable container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Created,
    Running,
    Exited,
}

/// One row of `--list` output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub state: String,
    pub image: String,
}

fn docker(args: &[&str], op: &str) -> Result<Captured> {
    run_capture("docker", args, None).map_err(|err| WtdError::ContainerFailure {
        op: op.to_string(),
        stderr: err.to_string(),
    })
}

fn docker_checked(args: &[&str], op: &str) -> Result<Captured> {
    let out = docker(args, op)?;
    if !out.success() {
        return Err(WtdError::ContainerFailure {
            op: op.to_string(),
            stderr: out.stderr,
        });
    }
    Ok(out)
}

/// Whether an image with this tag exists locally.
pub fn image_present(tag: &str) -> Result<bool> {
    Ok(docker(&["image", "inspect", tag], "image inspect")?.success())
}

/// Current state of a named container.
pub fn container_state(name: &str) -> Result<ContainerState> {
    let out = docker(
        &["inspect", "--format", "{{.State.Status}}", name],
        "inspect",
    )?;
    if !out.success() {
        return Ok(ContainerState::Absent);
    }
    Ok(parse_container_state(out.stdout.trim()))
}

fn parse_container_state(status: &str) -> ContainerState {
    match status {
        "running" => ContainerState::Running,
        "created" => ContainerState::Created,
        // paused/restarting/dead all need the same start-or-recreate
        // treatment as a stopped container.
        _ => ContainerState::Exited,
    }
}

/// Read one label off a container. `None` when the container or label is
/// absent.
pub fn container_label(name: &str, label: &str) -> Result<Option<String>> {
    let format = format!("{{{{index .Config.Labels \"{label}\"}}}}");
    let out = docker(&["inspect", "--format", &format, name], "inspect")?;
    if !out.success() {
        return Ok(None);
    }
    let value = out.stdout.trim().to_string();
    Ok((!value.is_empty()).then_some(value))
}

/// Ensure the named buildx builder exists and is selected.
pub fn ensure_builder(builder: &str) -> Result<()> {
    let inspect = docker(&["buildx", "inspect", builder], "buildx inspect")?;
    if inspect.success() {
        docker_checked(&["buildx", "use", builder], "buildx use")?;
        return Ok(());
    }
    log::info!("creating buildx builder {builder}");
    docker_checked(
        &[
            "buildx",
            "create",
            "--name",
            builder,
            "--driver",
            "docker-container",
            "--use",
        ],
        "buildx create",
    )?;
    Ok(())
}

/// Build the final image with `docker buildx bake`, streaming output.
pub fn build(layout: &Layout, config: &Config) -> Result<()> {
    ensure_builder(&config.builder)?;

    let mut args: Vec<&str> = vec!["buildx", "bake", "--builder", &config.builder, "--load"];
    if config.nocache {
        args.push("--no-cache");
    }
    args.push("final");

    let worktree = layout.worktree_dir();
    log::info!("building {} with bake", layout.image_tag());
    match run_inherit("docker", &args, Some(&worktree)) {
        Ok(ExitOutcome::Code(0)) => Ok(()),
        Ok(outcome) if outcome.cancelled() => Err(WtdError::Cancelled),
        Ok(ExitOutcome::Code(code)) => Err(WtdError::BuildFailed {
            stderr: format!("docker buildx bake exited with status {code}"),
        }),
        Ok(ExitOutcome::Signalled(sig)) => Err(WtdError::BuildFailed {
            stderr: format!("docker buildx bake killed by signal {sig}"),
        }),
        Err(err) => Err(WtdError::BuildFailed {
            stderr: err.to_string(),
        }),
    }
}

/// Create a container from the merged service description.
pub fn create(layout: &Layout, service: &Mapping) -> Result<()> {
    let args = create_args(layout, service);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    docker_checked(&arg_refs, "create")?;
    Ok(())
}

/// Translate the merged service description into `docker create` flags.
///
/// Understood keys: image, container_name, hostname, working_dir, volumes,
/// environment (null values forward the host variable), labels, runtime,
/// network_mode, stdin_open, tty, command. Unknown keys are ignored, which
/// keeps repo-local fragments forward-compatible.
fn create_args(layout: &Layout, service: &Mapping) -> Vec<String> {
    let get = |key: &str| service.get(key);
    let mut args = vec!["create".to_string()];

    args.push("--name".to_string());
    args.push(
        get("container_name")
            .and_then(Value::as_str)
            .unwrap_or(layout.container_name())
            .to_string(),
    );

    if let Some(hostname) = get("hostname").and_then(Value::as_str) {
        args.push("--hostname".to_string());
        args.push(hostname.to_string());
    }
    if let Some(workdir) = get("working_dir").and_then(Value::as_str) {
        args.push("--workdir".to_string());
        args.push(workdir.to_string());
    }
    if get("stdin_open").and_then(Value::as_bool).unwrap_or(false) {
        args.push("--interactive".to_string());
    }
    if get("tty").and_then(Value::as_bool).unwrap_or(false) {
        args.push("--tty".to_string());
    }
    if let Some(runtime) = get("runtime").and_then(Value::as_str) {
        args.push("--runtime".to_string());
        args.push(runtime.to_string());
    }
    if let Some(network) = get("network_mode").and_then(Value::as_str) {
        args.push("--network".to_string());
        args.push(network.to_string());
    }

    if let Some(volumes) = get("volumes").and_then(Value::as_sequence) {
        for volume in volumes.iter().filter_map(Value::as_str) {
            args.push("--volume".to_string());
            args.push(expand_volume_source(volume));
        }
    }

    if let Some(environment) = get("environment").and_then(Value::as_mapping) {
        for (key, value) in environment {
            let Some(key) = key.as_str() else { continue };
            let entry = match value {
                // Null forwards the variable from the host environment;
                // unset host variables are skipped entirely.
                Value::Null => match std::env::var(key) {
                    Ok(host_value) => format!("{key}={host_value}"),
                    Err(_) => continue,
                },
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={}", scalar_to_string(other)),
            };
            args.push("--env".to_string());
            args.push(entry);
        }
    }

    if let Some(labels) = get("labels").and_then(Value::as_mapping) {
        for (key, value) in labels {
            if let (Some(key), Some(value)) = (key.as_str(), value.as_str()) {
                args.push("--label".to_string());
                args.push(format!("{key}={value}"));
            }
        }
    }

    args.push(
        get("image")
            .and_then(Value::as_str)
            .unwrap_or(&layout.image_tag())
            .to_string(),
    );

    if let Some(command) = get("command").and_then(Value::as_sequence) {
        for word in command.iter().filter_map(Value::as_str) {
            args.push(word.to_string());
        }
    }

    args
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// Expand `~` in the host half of a `src:dst[:mode]` volume entry.
fn expand_volume_source(volume: &str) -> String {
    let Some((src, rest)) = volume.split_once(':') else {
        return volume.to_string();
    };
    format!("{}:{rest}", expand_home(src).display())
}

/// Start a created or exited container.
pub fn start(name: &str) -> Result<()> {
    docker_checked(&["start", name], "start")?;
    Ok(())
}

/// Stop and remove a container if it exists.
pub fn remove_container(name: &str) -> Result<()> {
    if container_state(name)? == ContainerState::Absent {
        return Ok(());
    }
    log::info!("removing container {name}");
    docker(&["stop", name], "stop")?;
    docker_checked(&["rm", "--force", name], "rm")?;
    Ok(())
}

/// Attach an interactive shell inside the running container.
pub fn attach(name: &str, workdir: &str) -> Result<i32> {
    exec_outcome(
        &["exec", "--interactive", "--tty", "--workdir", workdir, name, "bash"],
        "attach",
    )
}

/// Run a one-shot command inside the running container, inheriting stdio.
///
/// A single argument containing shell metacharacters is routed through
/// `bash -c` so `wtd spec "a && b"` behaves like a shell line.
pub fn exec(name: &str, workdir: &str, command: &[String]) -> Result<i32> {
    let mut args: Vec<&str> = vec!["exec", "--interactive", "--workdir", workdir, name];

    let shell_line;
    if command.len() == 1 && needs_shell(&command[0]) {
        shell_line = command[0].clone();
        args.extend_from_slice(&["bash", "-c", &shell_line]);
    } else {
        args.extend(command.iter().map(String::as_str));
    }
    exec_outcome(&args, "exec")
}

fn exec_outcome(args: &[&str], op: &str) -> Result<i32> {
    match run_inherit("docker", args, None) {
        Ok(outcome) if outcome.cancelled() => Err(WtdError::Cancelled),
        Ok(outcome) => Ok(outcome.as_code()),
        Err(err) => Err(WtdError::ContainerFailure {
            op: op.to_string(),
            stderr: err.to_string(),
        }),
    }
}

/// Whether a command string needs shell interpretation.
fn needs_shell(command: &str) -> bool {
    command
        .chars()
        .any(|c| matches!(c, ';' | '&' | '|' | '<' | '>' | '$' | '`' | '\'' | '"'))
        || command.starts_with("bash -c")
}

/// List wtd-managed containers.
pub fn list_managed() -> Result<Vec<ContainerInfo>> {
    let out = docker_checked(
        &[
            "ps",
            "--all",
            "--filter",
            &format!("label={MANAGED_LABEL}"),
            "--format",
            "{{json .}}",
        ],
        "ps",
    )?;

    let mut containers = Vec::new();
    for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(row) => containers.push(ContainerInfo {
                name: json_str(&row, "Names"),
                state: json_str(&row, "State"),
                image: json_str(&row, "Image"),
            }),
            Err(err) => log::warn!("unparseable docker ps row: {err}"),
        }
    }
    Ok(containers)
}

fn json_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `(name, wtd.spec label)` for every managed container.
pub fn managed_container_specs() -> Result<Vec<(String, String)>> {
    let out = docker_checked(
        &[
            "ps",
            "--all",
            "--filter",
            &format!("label={MANAGED_LABEL}"),
            "--format",
            "{{.Names}}\t{{.Label \"wtd.spec\"}}",
        ],
        "ps",
    )?;
    Ok(out
        .stdout
        .lines()
        .filter_map(|line| {
            let (name, label) = line.split_once('\t')?;
            (!name.is_empty()).then(|| (name.to_string(), label.trim().to_string()))
        })
        .collect())
}

/// All wtd-managed container names.
pub fn managed_containers() -> Result<Vec<String>> {
    containers_with_filter(&format!("label={MANAGED_LABEL}"))
}

fn containers_with_filter(filter: &str) -> Result<Vec<String>> {
    let out = docker_checked(
        &[
            "ps",
            "--all",
            "--filter",
            filter,
            "--format",
            "{{.Names}}",
        ],
        "ps",
    )?;
    Ok(out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Remove images by reference pattern (`<container-name>` repository, any
/// tag), ignoring failures for images already gone.
pub fn remove_images(repository: &str) -> Result<Vec<String>> {
    let out = docker_checked(
        &[
            "images",
            "--filter",
            &format!("reference={repository}"),
            "--format",
            "{{.Repository}}:{{.Tag}}",
        ],
        "images",
    )?;
    let tags: Vec<String> = out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    for tag in &tags {
        log::info!("removing image {tag}");
        docker(&["rmi", "--force", tag], "rmi")?;
    }
    Ok(tags)
}

/// Remove images carrying the wtd management label (full prune).
pub fn remove_labeled_images() -> Result<()> {
    let out = docker_checked(
        &[
            "images",
            "--quiet",
            "--filter",
            &format!("label={MANAGED_LABEL}"),
        ],
        "images",
    )?;
    for id in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        docker(&["rmi", "--force", id], "rmi")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::RepoSpec;

    #[test]
    fn parses_container_states() {
        assert_eq!(parse_container_state("running"), ContainerState::Running);
        assert_eq!(parse_container_state("created"), ContainerState::Created);
        assert_eq!(parse_container_state("exited"), ContainerState::Exited);
        assert_eq!(parse_container_state("paused"), ContainerState::Exited);
        assert_eq!(parse_container_state("dead"), ContainerState::Exited);
    }

    #[test]
    fn shell_metacharacters_are_detected() {
        assert!(needs_shell("git status; pwd"));
        assert!(needs_shell("a && b"));
        assert!(needs_shell("echo $HOME"));
        assert!(needs_shell("bash -c 'ls'"));
        assert!(!needs_shell("git"));
        assert!(!needs_shell("status"));
    }

    #[test]
    fn volume_home_expansion_only_touches_source() {
        let expanded = expand_volume_source("~/.ssh:/home/dev/.ssh:ro");
        assert!(expanded.ends_with(":/home/dev/.ssh:ro"));
        assert!(!expanded.starts_with("~"));

        assert_eq!(
            expand_volume_source("/tmp/.X11-unix:/tmp/.X11-unix:rw"),
            "/tmp/.X11-unix:/tmp/.X11-unix:rw"
        );
    }

    fn service_fixture() -> (Layout, Mapping) {
        let spec = RepoSpec::parse("blooop/test_wtd@main#src").unwrap();
        let layout = Layout::new("/cache", &spec);
        let catalog = crate::extension::Catalog::load(None).unwrap();
        let exts: Vec<&crate::extension::Extension> = ["base", "user", "git-clone"]
            .iter()
            .map(|n| catalog.get(n).unwrap())
            .collect();
        let plan = crate::plan::BuildPlan::compute(&exts, "ubuntu:22.04", None);
        let service = crate::plan::service_description(&spec, &layout, &exts, plan.identity());
        (layout, service)
    }

    #[test]
    fn create_args_cover_mounts_labels_and_command() {
        let (layout, service) = service_fixture();
        let args = create_args(&layout, &service);

        assert_eq!(args[0], "create");
        let joined = args.join(" ");
        assert!(joined.contains("--name test_wtd-main"));
        assert!(joined.contains("--workdir /workspace/src"));
        assert!(joined.contains("--label wtd=1"));
        assert!(joined.contains("--label wtd.spec=blooop/test_wtd@main"));
        assert!(joined.contains(":/workspace "));
        assert!(joined.contains(":/workspace.git"));
        assert!(joined.contains("--env GIT_WORK_TREE=/workspace"));
        // image reference precedes the keep-alive command.
        let image_pos = args
            .iter()
            .position(|a| a.as_str() == "test_wtd-main:latest")
            .unwrap();
        let tail: Vec<&str> = args[image_pos + 1..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["tail", "-f", "/dev/null"]);
    }

    #[test]
    fn create_args_forward_runtime_and_network() {
        let (layout, mut service) = service_fixture();
        service.insert(
            Value::String("runtime".into()),
            Value::String("nvidia".into()),
        );
        service.insert(
            Value::String("network_mode".into()),
            Value::String("host".into()),
        );
        let args = create_args(&layout, &service);
        let joined = args.join(" ");
        assert!(joined.contains("--runtime nvidia"));
        assert!(joined.contains("--network host"));
    }

    #[test]
    fn null_environment_entries_forward_host_values() {
        let (layout, mut service) = service_fixture();
        let mut environment = Mapping::new();
        environment.insert(
            Value::String("WTD_TEST_FORWARDED_VAR".into()),
            Value::Null,
        );
        service.insert(
            Value::String("environment".into()),
            Value::Mapping(environment),
        );

        unsafe { std::env::set_var("WTD_TEST_FORWARDED_VAR", "forwarded") };
        let args = create_args(&layout, &service);
        unsafe { std::env::remove_var("WTD_TEST_FORWARDED_VAR") };

        assert!(args.contains(&"WTD_TEST_FORWARDED_VAR=forwarded".to_string()));
    }

    #[test]
    fn unset_null_environment_entries_are_skipped() {
        let (layout, mut service) = service_fixture();
        let mut environment = Mapping::new();
        environment.insert(
            Value::String("WTD_TEST_DEFINITELY_UNSET".into()),
            Value::Null,
        );
        service.insert(
            Value::String("environment".into()),
            Value::Mapping(environment),
        );
        let args = create_args(&layout, &service);
        assert!(!args.iter().any(|a| a.starts_with("WTD_TEST_DEFINITELY_UNSET")));
    }
}
