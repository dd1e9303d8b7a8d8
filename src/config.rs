//! Configuration record.
//!
//! Recognized flags and environment variables form a single [`Config`]
//! that is passed explicitly to components; nothing reads process-wide
//! state after construction.
//!
//! A worktree may additionally carry `.wtd.toml` at its root:
//!
//! ```toml
//! extensions = ["uv", "x11"]
//! base_image = "ubuntu:22.04"
//! platforms = ["linux/amd64", "linux/arm64"]
//! ```
//!
//! Repo config is advisory: parse failures log a warning and fall back to
//! defaults so a broken file never blocks a launch.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::layout::default_cache_root;

/// Default base image for the root build stage.
///
/// The upstream docs disagree between 22.04 and 24.04; we ship 22.04 and
/// treat the other spelling as historical (see DESIGN.md).
pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:22.04";

/// Default buildx builder name.
pub const DEFAULT_BUILDER: &str = "wtd_builder";

/// Default build platform list.
pub const DEFAULT_PLATFORMS: &[&str] = &["linux/amd64"];

/// Remote URL template; `{owner}` and `{repo}` are substituted.
pub const DEFAULT_REMOTE_TEMPLATE: &str = "git@github.com:{owner}/{repo}.git";

/// Extension excluded by `--no-gui`.
pub const GUI_EXTENSION: &str = "x11";

/// Extension excluded by `--no-gpu`.
pub const GPU_EXTENSION: &str = "nvidia";

/// One invocation's effective configuration: CLI flags merged with the
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_root: PathBuf,
    pub base_image: String,
    pub cache_registry: Option<String>,
    pub remote_template: String,
    pub builder: String,
    /// `--platforms` when given; repo config and [`DEFAULT_PLATFORMS`]
    /// fill in otherwise.
    pub platforms: Option<Vec<String>>,
    /// `-e` extensions requested on the command line.
    pub extensions: Vec<String>,
    pub rebuild: bool,
    pub nocache: bool,
    pub no_gui: bool,
    pub no_gpu: bool,
    pub no_container: bool,
}

impl Config {
    /// Build a config from the environment with default flags. Callers
    /// overlay CLI flags on the returned value.
    pub fn from_env() -> Config {
        Config {
            cache_root: default_cache_root(),
            base_image: env_or("WTD_BASE_IMAGE", DEFAULT_BASE_IMAGE),
            cache_registry: non_empty_env("WTD_CACHE_REGISTRY"),
            remote_template: env_or("WTD_REMOTE_TEMPLATE", DEFAULT_REMOTE_TEMPLATE),
            builder: DEFAULT_BUILDER.to_string(),
            platforms: None,
            extensions: Vec::new(),
            rebuild: false,
            nocache: false,
            no_gui: false,
            no_gpu: false,
            no_container: false,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Repo-local configuration loaded from `<worktree>/.wtd.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepoConfig {
    /// Extra extensions added to the root request set.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Per-repo base image override.
    #[serde(default)]
    pub base_image: Option<String>,

    /// Per-repo default platforms.
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
}

impl RepoConfig {
    /// Load `.wtd.toml` from a worktree root. Missing file means defaults;
    /// a malformed file logs a warning and also means defaults.
    pub fn load(worktree: &Path) -> RepoConfig {
        let path = worktree.join(".wtd.toml");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return RepoConfig::default();
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("ignoring {}: {err}", path.display());
                RepoConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_config_parses_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".wtd.toml"),
            r#"
extensions = ["uv", "x11"]
base_image = "debian:12"
platforms = ["linux/amd64", "linux/arm64"]
"#,
        )
        .unwrap();

        let config = RepoConfig::load(dir.path());
        assert_eq!(config.extensions, vec!["uv", "x11"]);
        assert_eq!(config.base_image.as_deref(), Some("debian:12"));
        assert_eq!(
            config.platforms,
            Some(vec!["linux/amd64".to_string(), "linux/arm64".to_string()])
        );
    }

    #[test]
    fn missing_repo_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RepoConfig::load(dir.path()), RepoConfig::default());
    }

    #[test]
    fn malformed_repo_config_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".wtd.toml"), "extensions = 3").unwrap();
        assert_eq!(RepoConfig::load(dir.path()), RepoConfig::default());
    }

    #[test]
    fn default_config_has_documented_defaults() {
        let config = Config::from_env();
        assert_eq!(config.builder, "wtd_builder");
        assert!(!config.rebuild);
        assert_eq!(config.platforms, None);
    }
}
