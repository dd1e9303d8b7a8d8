//! Build-plan emission.
//!
//! From an ordered extension list this module derives:
//!
//! 1. a multi-stage `Dockerfile` (one stage per extension, each inheriting
//!    from the previous stage, plus a terminal `final` stage),
//! 2. a merged `docker-compose.yml` service description,
//! 3. a `docker-bake.hcl` build file targeting the final stage with a
//!    local (and optionally registry) cache pair.
//!
//! Each stage has a content-derived identity:
//!
//! ```text
//! id_i = sha256(name_i ‖ id_{i-1} ‖ fragment_i ‖ base_image_if_root)[..12]
//! ```
//!
//! The final identity is encoded in an image tag so identical stacks hit
//! the build cache across worktrees. Artifact writes are idempotent:
//! identical content never re-touches a file.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::extension::Extension;
use crate::layout::{BUILDX_CACHE_DIR, GENERATED_FILES, Layout};
use crate::spec::RepoSpec;

/// Hex digits kept from the stage hash.
const IDENTITY_LEN: usize = 12;

/// One build stage; its name equals the extension name.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub identity: String,
    pub fragment: String,
}

/// An ordered multi-stage build plan.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub base_image: String,
    pub stages: Vec<Stage>,
    /// Identity of the whole plan: the last stage's identity, or a hash of
    /// the base image for an extension-less plan.
    identity: String,
}

impl BuildPlan {
    /// Compute stage identities for an ordered extension list.
    ///
    /// `salt` perturbs the root stage input (and through chaining every
    /// later identity); `--rebuild` passes a timestamp here to force a
    /// cache miss.
    pub fn compute(extensions: &[&Extension], base_image: &str, salt: Option<&str>) -> BuildPlan {
        let mut stages = Vec::with_capacity(extensions.len());
        let mut parent: Option<String> = None;

        for ext in extensions {
            let identity = stage_identity(
                ext.name(),
                parent.as_deref(),
                &ext.dockerfile,
                base_image,
                salt,
            );
            stages.push(Stage {
                name: ext.name().to_string(),
                identity: identity.clone(),
                fragment: ext.dockerfile.clone(),
            });
            parent = Some(identity);
        }

        let identity = parent.unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(base_image.as_bytes());
            if let Some(salt) = salt {
                hasher.update(salt.as_bytes());
            }
            truncate_hash(hasher)
        });

        BuildPlan {
            base_image: base_image.to_string(),
            stages,
            identity,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Stage names in build order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Render the multi-stage Dockerfile.
    pub fn dockerfile(&self, spec: &RepoSpec) -> String {
        let mut out = String::from(
            "# Generated by wtd. Do not edit; regenerated on every launch.\n",
        );

        let mut parent = self.base_image.clone();
        for stage in &self.stages {
            out.push('\n');
            out.push_str(&format!("FROM {parent} AS {}\n", stage.name));
            let fragment = stage.fragment.trim_end();
            if !fragment.is_empty() {
                out.push_str(fragment);
                out.push('\n');
            }
            parent = stage.name.clone();
        }

        out.push('\n');
        out.push_str(&format!("FROM {parent} AS final\n"));
        out.push_str(&format!(
            "LABEL wtd=\"1\" wtd.spec=\"{}\"\n",
            spec.label()
        ));
        out.push_str("WORKDIR /workspace\n");
        out.push_str("CMD [\"bash\"]\n");
        out
    }

    /// Render the bake build file with one target for the final stage.
    pub fn bake_file(&self, layout: &Layout, config: &Config, platforms: &[String]) -> String {
        let tags = format!(
            "[\"{}\", \"{}\"]",
            layout.image_tag(),
            layout.identity_tag(&self.identity)
        );
        let platforms_hcl = format!(
            "[{}]",
            platforms
                .iter()
                .map(|p| format!("\"{p}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut cache_from = vec![format!("\"type=local,src={BUILDX_CACHE_DIR}\"")];
        let mut cache_to = vec![format!(
            "\"type=local,dest={BUILDX_CACHE_DIR},mode=max\""
        )];
        if let Some(registry) = &config.cache_registry {
            let cache_ref = format!("{registry}/{}:buildcache", layout.container_name());
            cache_from.push(format!("\"type=registry,ref={cache_ref}\""));
            cache_to.push(format!(
                "\"type=registry,ref={cache_ref},mode=max\""
            ));
        }

        format!(
            r#"group "default" {{
  targets = ["final"]
}}

target "final" {{
  context    = "."
  dockerfile = "Dockerfile"
  target     = "final"
  tags       = {tags}
  platforms  = {platforms_hcl}
  cache-from = [{cache_from}]
  cache-to   = [{cache_to}]
}}
"#,
            cache_from = cache_from.join(", "),
            cache_to = cache_to.join(", "),
        )
    }
}

/// Identity of a single stage. Root stages (no parent) fold in the base
/// image tag and the optional rebuild salt.
pub fn stage_identity(
    name: &str,
    parent: Option<&str>,
    fragment: &str,
    base_image: &str,
    salt: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    if let Some(parent) = parent {
        hasher.update(parent.as_bytes());
    }
    hasher.update(fragment.as_bytes());
    if parent.is_none() {
        hasher.update(base_image.as_bytes());
        if let Some(salt) = salt {
            hasher.update(salt.as_bytes());
        }
    }
    truncate_hash(hasher)
}

fn truncate_hash(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(IDENTITY_LEN);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
        if hex.len() >= IDENTITY_LEN {
            break;
        }
    }
    hex.truncate(IDENTITY_LEN);
    hex
}

/// Build the merged service description for the container.
///
/// Starts from the generated base service (image, mounts, git plumbing,
/// labels) and deep-merges each extension's compose fragment in stage
/// order: maps merge recursively, lists concatenate then de-duplicate
/// preserving order, scalars from later extensions overwrite earlier ones.
pub fn service_description(
    spec: &RepoSpec,
    layout: &Layout,
    extensions: &[&Extension],
    identity: &str,
) -> Mapping {
    let mut service = base_service(spec, layout, identity);
    for ext in extensions {
        if !ext.compose.is_empty() {
            merge_mapping(&mut service, &ext.compose);
        }
    }
    service
}

fn base_service(spec: &RepoSpec, layout: &Layout, identity: &str) -> Mapping {
    let worktree = layout.worktree_dir();
    let bare = layout.bare_dir();
    let name = layout.container_name();

    let mut labels = Mapping::new();
    labels.insert(yaml_str("wtd"), yaml_str("1"));
    labels.insert(yaml_str("wtd.spec"), yaml_str(&spec.label()));
    labels.insert(yaml_str("wtd.identity"), yaml_str(identity));

    // GIT_DIR/GIT_WORK_TREE point git at the mounted bare clone, so the
    // worktree's on-disk `.git` file (which names a host path) is never
    // consulted or rewritten inside the container.
    let mut environment = Mapping::new();
    environment.insert(
        yaml_str("GIT_DIR"),
        yaml_str(&format!("/workspace.git/worktrees/{}", layout.worktree_name())),
    );
    environment.insert(yaml_str("GIT_WORK_TREE"), yaml_str("/workspace"));
    environment.insert(yaml_str("REPO_NAME"), yaml_str(&spec.repo));
    environment.insert(yaml_str("BRANCH_NAME"), yaml_str(&spec.safe_branch()));

    let volumes = vec![
        yaml_str(&format!("{}:/workspace", worktree.display())),
        yaml_str(&format!("{}:/workspace.git", bare.display())),
    ];

    let mut service = Mapping::new();
    service.insert(yaml_str("image"), yaml_str(&layout.image_tag()));
    service.insert(yaml_str("container_name"), yaml_str(name));
    service.insert(yaml_str("hostname"), yaml_str(name));
    service.insert(
        yaml_str("working_dir"),
        yaml_str(&Layout::container_workdir(spec)),
    );
    service.insert(yaml_str("volumes"), Value::Sequence(volumes));
    service.insert(yaml_str("environment"), Value::Mapping(environment));
    service.insert(yaml_str("labels"), Value::Mapping(labels));
    service.insert(yaml_str("stdin_open"), Value::Bool(true));
    service.insert(yaml_str("tty"), Value::Bool(true));
    service.insert(
        yaml_str("command"),
        Value::Sequence(vec![yaml_str("tail"), yaml_str("-f"), yaml_str("/dev/null")]),
    );
    service
}

fn yaml_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Deep-merge `overlay` into `target`.
fn merge_mapping(target: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        match target.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn merge_value(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Mapping(t), Value::Mapping(o)) => merge_mapping(t, o),
        (Value::Sequence(t), Value::Sequence(o)) => {
            for item in o {
                if !t.contains(item) {
                    t.push(item.clone());
                }
            }
        }
        (t, o) => *t = o.clone(),
    }
}

/// Render the full compose document for a merged service.
pub fn compose_document(layout: &Layout, service: &Mapping) -> String {
    let mut services = Mapping::new();
    services.insert(
        yaml_str(layout.container_name()),
        Value::Mapping(service.clone()),
    );
    let mut doc = Mapping::new();
    doc.insert(yaml_str("services"), Value::Mapping(services));

    let mut out = String::from("# Generated by wtd. Do not edit; regenerated on every launch.\n");
    out.push_str(&serde_yaml::to_string(&Value::Mapping(doc)).unwrap_or_default());
    out
}

/// Write all artifacts into the worktree. Returns true when any file
/// changed on disk.
pub fn emit(
    layout: &Layout,
    spec: &RepoSpec,
    plan: &BuildPlan,
    service: &Mapping,
    config: &Config,
    platforms: &[String],
) -> std::io::Result<bool> {
    let mut changed = false;
    changed |= write_if_changed(&layout.dockerfile_path(), &plan.dockerfile(spec))?;
    changed |= write_if_changed(&layout.compose_path(), &compose_document(layout, service))?;
    changed |= write_if_changed(&layout.bake_path(), &plan.bake_file(layout, config, platforms))?;
    std::fs::create_dir_all(layout.buildx_cache_dir())?;
    ensure_excludes(layout)?;
    Ok(changed)
}

/// Write `content` to `path` only when it differs from what is on disk.
pub fn write_if_changed(path: &Path, content: &str) -> std::io::Result<bool> {
    if let Ok(existing) = std::fs::read_to_string(path)
        && existing == content
    {
        return Ok(false);
    }
    std::fs::write(path, content)?;
    Ok(true)
}

/// Keep the generated set out of `git status` via the worktree-private
/// exclude file; the user's `.gitignore` is never touched.
fn ensure_excludes(layout: &Layout) -> std::io::Result<()> {
    let path = layout.worktree_exclude_path();
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if !parent.parent().is_some_and(|worktree_meta| worktree_meta.exists()) {
        // Bare clone not materialized (tests, --no-container dry paths).
        return Ok(());
    }
    std::fs::create_dir_all(parent)?;

    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    let mut changed = false;
    for name in GENERATED_FILES
        .iter()
        .map(|s| s.to_string())
        .chain([format!("{BUILDX_CACHE_DIR}/")])
    {
        if !lines.iter().any(|l| l == &name) {
            lines.push(name);
            changed = true;
        }
    }
    if changed {
        std::fs::write(&path, lines.join("\n") + "\n")?;
    }
    Ok(())
}
