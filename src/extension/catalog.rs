//! Extension discovery and validation.
//!
//! The effective catalog is layered:
//!
//! 1. Built-ins embedded in the binary (the asset table below).
//! 2. Repo-local definitions under `<worktree>/.wtd/extensions/*/`,
//!    discovered by searching for `extension.toml` manifests.
//!
//! Later tiers win on name collision, so a repository can shadow a
//! built-in wholesale. Validation runs after discovery: unknown dependency
//! names, duplicate names within one tier, and malformed auto-detect
//! regexes are all catalog errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WtdError};

use super::{Extension, Manifest, Source};

/// Manifest filename inside each extension directory.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Repo-local extension root, relative to the worktree.
pub const LOCAL_EXTENSIONS_DIR: &str = ".wtd/extensions";

struct BuiltinAsset {
    manifest: &'static str,
    dockerfile: Option<&'static str>,
    compose: Option<&'static str>,
}

macro_rules! builtin {
    ($dir:literal, dockerfile, compose) => {
        BuiltinAsset {
            manifest: include_str!(concat!("builtin/", $dir, "/extension.toml")),
            dockerfile: Some(include_str!(concat!("builtin/", $dir, "/Dockerfile"))),
            compose: Some(include_str!(concat!("builtin/", $dir, "/docker-compose.yml"))),
        }
    };
    ($dir:literal, dockerfile) => {
        BuiltinAsset {
            manifest: include_str!(concat!("builtin/", $dir, "/extension.toml")),
            dockerfile: Some(include_str!(concat!("builtin/", $dir, "/Dockerfile"))),
            compose: None,
        }
    };
    ($dir:literal, compose) => {
        BuiltinAsset {
            manifest: include_str!(concat!("builtin/", $dir, "/extension.toml")),
            dockerfile: None,
            compose: Some(include_str!(concat!("builtin/", $dir, "/docker-compose.yml"))),
        }
    };
}

const BUILTINS: &[BuiltinAsset] = &[
    builtin!("base", dockerfile),
    builtin!("user", dockerfile),
    builtin!("git-clone", dockerfile, compose),
    builtin!("ssh", dockerfile, compose),
    builtin!("uv", dockerfile),
    builtin!("pixi", dockerfile),
    builtin!("x11", dockerfile, compose),
    builtin!("nvidia", compose),
];

/// The effective extension catalog for one invocation.
#[derive(Debug, Clone)]
pub struct Catalog {
    extensions: BTreeMap<String, Extension>,
}

impl Catalog {
    /// Load built-ins plus (when a worktree is given) repo-local
    /// extensions, then validate the result.
    pub fn load(worktree: Option<&Path>) -> Result<Catalog> {
        let mut extensions = BTreeMap::new();

        for asset in BUILTINS {
            let ext = parse_parts(
                asset.manifest,
                asset.dockerfile.unwrap_or(""),
                asset.compose,
                Source::Builtin,
                Path::new("<builtin>"),
            )?;
            let name = ext.name().to_string();
            if extensions.insert(name.clone(), ext).is_some() {
                return Err(WtdError::CatalogInvalid {
                    reason: format!("duplicate built-in extension '{name}'"),
                });
            }
        }

        if let Some(worktree) = worktree {
            for ext in discover_local(worktree)? {
                let name = ext.name().to_string();
                if let Some(previous) = extensions.insert(name.clone(), ext)
                    && previous.source == Source::RepoLocal
                {
                    return Err(WtdError::CatalogInvalid {
                        reason: format!("duplicate repo-local extension '{name}'"),
                    });
                }
            }
        }

        let catalog = Catalog { extensions };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Build a catalog directly from in-memory extensions, skipping
    /// discovery and validation. Test construction only.
    #[cfg(test)]
    pub(crate) fn from_extensions(exts: Vec<Extension>) -> Catalog {
        Catalog {
            extensions: exts
                .into_iter()
                .map(|ext| (ext.name().to_string(), ext))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Extension> {
        self.extensions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// All extensions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.values()
    }

    /// Names of extensions marked `always_load`.
    pub fn always_load(&self) -> Vec<String> {
        self.extensions
            .values()
            .filter(|ext| ext.manifest.always_load)
            .map(|ext| ext.name().to_string())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        for ext in self.extensions.values() {
            // "final" is the terminal Dockerfile stage name.
            if ext.name() == "final" {
                return Err(WtdError::CatalogInvalid {
                    reason: "extension name 'final' is reserved".to_string(),
                });
            }
            for dep in &ext.manifest.dependencies {
                if !self.extensions.contains_key(dep) {
                    return Err(WtdError::CatalogInvalid {
                        reason: format!(
                            "extension '{}' depends on unknown extension '{dep}'",
                            ext.name()
                        ),
                    });
                }
            }
            for pattern in ext
                .manifest
                .auto_detect
                .files
                .iter()
                .chain(&ext.manifest.auto_detect.directories)
            {
                if let Err(err) = regex::Regex::new(pattern) {
                    return Err(WtdError::CatalogInvalid {
                        reason: format!(
                            "extension '{}' has invalid auto-detect pattern '{pattern}': {err}",
                            ext.name()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Find repo-local extension directories: any directory under
/// `.wtd/extensions/` (searched recursively) containing a manifest.
fn discover_local(worktree: &Path) -> Result<Vec<Extension>> {
    let root = worktree.join(LOCAL_EXTENSIONS_DIR);
    let mut found = Vec::new();
    if root.is_dir() {
        walk_for_manifests(&root, &mut found)?;
    }
    Ok(found)
}

fn walk_for_manifests(dir: &Path, found: &mut Vec<Extension>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|err| WtdError::CatalogInvalid {
        reason: format!("cannot read {}: {err}", dir.display()),
    })?;

    let mut subdirs: Vec<PathBuf> = Vec::new();
    let mut has_manifest = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|n| n == MANIFEST_FILE) {
            has_manifest = true;
        }
    }

    if has_manifest {
        found.push(load_dir(dir)?);
        return Ok(());
    }

    subdirs.sort();
    for sub in subdirs {
        walk_for_manifests(&sub, found)?;
    }
    Ok(())
}

/// Load one extension directory: `extension.toml` plus optional
/// `Dockerfile` and `docker-compose.yml` fragments.
fn load_dir(dir: &Path) -> Result<Extension> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = std::fs::read_to_string(&manifest_path).map_err(|err| {
        WtdError::ManifestInvalid {
            path: manifest_path.clone(),
            reason: err.to_string(),
        }
    })?;

    let dockerfile = read_optional(&dir.join("Dockerfile"))?;
    let compose = read_optional(&dir.join("docker-compose.yml"))?;

    parse_parts(
        &manifest,
        dockerfile.as_deref().unwrap_or(""),
        compose.as_deref(),
        Source::RepoLocal,
        &manifest_path,
    )
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WtdError::ManifestInvalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

fn parse_parts(
    manifest_str: &str,
    dockerfile: &str,
    compose_str: Option<&str>,
    source: Source,
    origin: &Path,
) -> Result<Extension> {
    let manifest: Manifest =
        toml::from_str(manifest_str).map_err(|err| WtdError::ManifestInvalid {
            path: origin.to_path_buf(),
            reason: err.to_string(),
        })?;

    if manifest.name.is_empty() {
        return Err(WtdError::ManifestInvalid {
            path: origin.to_path_buf(),
            reason: "name must not be empty".to_string(),
        });
    }

    let compose = match compose_str {
        None => serde_yaml::Mapping::new(),
        Some(raw) => match serde_yaml::from_str::<serde_yaml::Value>(raw) {
            Ok(serde_yaml::Value::Mapping(map)) => map,
            Ok(serde_yaml::Value::Null) => serde_yaml::Mapping::new(),
            Ok(_) => {
                return Err(WtdError::ManifestInvalid {
                    path: origin.to_path_buf(),
                    reason: "compose fragment must be a mapping".to_string(),
                });
            }
            Err(err) => {
                return Err(WtdError::ManifestInvalid {
                    path: origin.to_path_buf(),
                    reason: format!("compose fragment: {err}"),
                });
            }
        },
    };

    Ok(Extension {
        manifest,
        source,
        dockerfile: dockerfile.to_string(),
        compose,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ext(root: &Path, name: &str, manifest: &str, dockerfile: Option<&str>) {
        let dir = root.join(LOCAL_EXTENSIONS_DIR).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        if let Some(df) = dockerfile {
            std::fs::write(dir.join("Dockerfile"), df).unwrap();
        }
    }

    #[test]
    fn builtins_load_and_validate() {
        let catalog = Catalog::load(None).unwrap();
        for name in ["base", "user", "git-clone", "ssh", "uv", "pixi", "x11", "nvidia"] {
            assert!(catalog.contains(name), "missing builtin {name}");
        }
        let mut always = catalog.always_load();
        always.sort();
        assert_eq!(always, vec!["base", "git-clone", "user"]);
    }

    #[test]
    fn builtin_fragments_are_attached() {
        let catalog = Catalog::load(None).unwrap();
        assert!(catalog.get("base").unwrap().dockerfile.contains("apt-get"));
        // nvidia ships no Dockerfile: empty fragment, compose only.
        let nvidia = catalog.get("nvidia").unwrap();
        assert!(nvidia.dockerfile.is_empty());
        assert!(!nvidia.compose.is_empty());
    }

    #[test]
    fn repo_local_extension_is_discovered() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(
            dir.path(),
            "mytool",
            "name = \"mytool\"\ndependencies = [\"base\"]\n",
            Some("RUN echo mytool\n"),
        );

        let catalog = Catalog::load(Some(dir.path())).unwrap();
        let ext = catalog.get("mytool").unwrap();
        assert_eq!(ext.source, Source::RepoLocal);
        assert_eq!(ext.dockerfile, "RUN echo mytool\n");
    }

    #[test]
    fn repo_local_shadows_builtin() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(
            dir.path(),
            "uv",
            "name = \"uv\"\ndescription = \"local override\"\n",
            Some("RUN echo custom-uv\n"),
        );

        let catalog = Catalog::load(Some(dir.path())).unwrap();
        let ext = catalog.get("uv").unwrap();
        assert_eq!(ext.source, Source::RepoLocal);
        assert_eq!(ext.manifest.description, "local override");
    }

    #[test]
    fn duplicate_local_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(dir.path(), "one", "name = \"same\"\n", None);
        write_ext(dir.path(), "two", "name = \"same\"\n", None);

        let err = Catalog::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, WtdError::CatalogInvalid { .. }));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(
            dir.path(),
            "broken",
            "name = \"broken\"\ndependencies = [\"no-such-ext\"]\n",
            None,
        );

        let err = Catalog::load(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("no-such-ext"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(
            dir.path(),
            "badre",
            "name = \"badre\"\n[auto_detect]\nfiles = [\"([\"]\n",
            None,
        );

        let err = Catalog::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, WtdError::CatalogInvalid { .. }));
    }

    #[test]
    fn malformed_manifest_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        write_ext(dir.path(), "syntax", "name = [not toml", None);

        let err = Catalog::load(Some(dir.path())).unwrap_err();
        let WtdError::ManifestInvalid { path, .. } = err else {
            panic!("expected ManifestInvalid, got {err:?}");
        };
        assert!(path.ends_with("syntax/extension.toml"));
    }

    #[test]
    fn nested_extension_directories_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir
            .path()
            .join(LOCAL_EXTENSIONS_DIR)
            .join("group")
            .join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(MANIFEST_FILE), "name = \"deep\"\n").unwrap();

        let catalog = Catalog::load(Some(dir.path())).unwrap();
        assert!(catalog.contains("deep"));
    }
}
