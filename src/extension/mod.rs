//! Composable environment extensions.
//!
//! An extension is a named unit contributing a Dockerfile build-stage
//! fragment and a compose service fragment. Extensions are declared by an
//! `extension.toml` manifest next to the optional `Dockerfile` and
//! `docker-compose.yml` fragment files:
//!
//! ```toml
//! name = "uv"
//! description = "Python tooling via uv"
//! dependencies = ["base"]
//! never_load = []
//! always_load = false
//!
//! [auto_detect]
//! files = ["^pyproject\\.toml$", "^requirements.*\\.txt$"]
//! ```

pub mod catalog;
pub mod detect;
pub mod resolve;

pub use catalog::Catalog;

use std::collections::BTreeMap;

use serde::Deserialize;

/// Auto-detection predicates. The extension matches a worktree when any
/// one predicate class produces a hit (see [`detect`]).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AutoDetect {
    /// Regexes matched against names of regular files directly under the
    /// worktree root.
    #[serde(default)]
    pub files: Vec<String>,

    /// Regexes matched against directory names directly under the worktree
    /// root.
    #[serde(default)]
    pub directories: Vec<String>,

    /// Host filesystem paths whose existence triggers the extension.
    /// A leading `~` expands to the home directory.
    #[serde(default)]
    pub host_paths: Vec<String>,

    /// filename -> substrings; matches when the file exists under the
    /// worktree and contains at least one substring.
    #[serde(default)]
    pub file_contents: BTreeMap<String, Vec<String>>,
}

impl AutoDetect {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.directories.is_empty()
            && self.host_paths.is_empty()
            && self.file_contents.is_empty()
    }
}

/// Declarative extension manifest (`extension.toml`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Names of extensions that must be loaded before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Extensions this one cannot coexist with (symmetric).
    #[serde(default)]
    pub never_load: Vec<String>,

    /// Load regardless of auto-detection.
    #[serde(default)]
    pub always_load: bool,

    #[serde(default)]
    pub auto_detect: AutoDetect,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub platforms: Option<Vec<String>>,
}

/// Which tier an extension was discovered from. Repo-local definitions
/// shadow built-ins of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Builtin,
    RepoLocal,
}

/// A fully loaded extension: manifest plus its two text fragments.
#[derive(Debug, Clone)]
pub struct Extension {
    pub manifest: Manifest,
    pub source: Source,

    /// Dockerfile build-stage fragment, verbatim. Empty when the extension
    /// ships no Dockerfile.
    pub dockerfile: String,

    /// Compose service fragment as parsed YAML. Empty mapping when the
    /// extension ships no fragment.
    pub compose: serde_yaml::Mapping,
}

impl Extension {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}
