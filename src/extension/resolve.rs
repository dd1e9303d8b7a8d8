//! Dependency resolution over the extension graph.
//!
//! The root request set is the union of always-load extensions,
//! auto-detected extensions, user-requested (`-e`) extensions, and the
//! repo-config list, minus the GUI/GPU extensions when disabled by flag.
//!
//! Resolution computes the transitive dependency closure, rejects
//! `never_load` conflicts pairwise across the closure, and returns a
//! deterministic topological order: depth-first post-order with grey/black
//! marking, ties broken by name ascending. A grey re-entry is a cycle and
//! reports the discovered back-edge path.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{Config, GPU_EXTENSION, GUI_EXTENSION};
use crate::error::{Result, WtdError};

use super::Catalog;

/// Assemble the root request set for one invocation.
pub fn root_set(
    catalog: &Catalog,
    auto_detected: &[String],
    user_requested: &[String],
    repo_requested: &[String],
    config: &Config,
) -> BTreeSet<String> {
    let mut roots: BTreeSet<String> = catalog.always_load().into_iter().collect();
    roots.extend(auto_detected.iter().cloned());
    roots.extend(repo_requested.iter().cloned());
    roots.extend(user_requested.iter().cloned());

    // Flag exclusions drop the extension from the request set; anything
    // that reaches it through a dependency still fails resolution, which
    // is the desired loud behavior.
    if config.no_gui {
        roots.remove(GUI_EXTENSION);
    }
    if config.no_gpu {
        roots.remove(GPU_EXTENSION);
    }
    roots
}

/// Resolve a root set to the ordered extension list.
pub fn resolve(catalog: &Catalog, roots: &BTreeSet<String>) -> Result<Vec<String>> {
    for name in roots {
        if !catalog.contains(name) {
            return Err(WtdError::CatalogInvalid {
                reason: format!("unknown extension '{name}' requested"),
            });
        }
    }

    let closure = transitive_closure(catalog, roots)?;
    check_never_load(catalog, &closure)?;
    topo_sort(catalog, roots)
}

fn transitive_closure(catalog: &Catalog, roots: &BTreeSet<String>) -> Result<BTreeSet<String>> {
    let mut closure = BTreeSet::new();
    let mut pending: Vec<String> = roots.iter().cloned().collect();
    while let Some(name) = pending.pop() {
        if !closure.insert(name.clone()) {
            continue;
        }
        let Some(ext) = catalog.get(&name) else {
            // Roots were checked by the caller, so this is a dependency.
            continue;
        };
        for dep in &ext.manifest.dependencies {
            if !catalog.contains(dep) {
                return Err(WtdError::DependencyMissing {
                    extension: name.clone(),
                    dependency: dep.clone(),
                });
            }
            if !closure.contains(dep) {
                pending.push(dep.clone());
            }
        }
    }
    Ok(closure)
}

fn check_never_load(catalog: &Catalog, closure: &BTreeSet<String>) -> Result<()> {
    for name in closure {
        let Some(ext) = catalog.get(name) else {
            continue;
        };
        for banned in &ext.manifest.never_load {
            if closure.contains(banned) {
                // Normalize so the pair reads the same regardless of which
                // side declared the exclusion.
                let (a, b) = if name < banned {
                    (name.clone(), banned.clone())
                } else {
                    (banned.clone(), name.clone())
                };
                return Err(WtdError::IncompatibleExtensions { a, b });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Grey,
    Black,
}

fn topo_sort(catalog: &Catalog, roots: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
    let mut order = Vec::new();
    let mut trail = Vec::new();

    for root in roots {
        visit(catalog, root, &mut marks, &mut order, &mut trail)?;
    }
    Ok(order)
}

fn visit(
    catalog: &Catalog,
    name: &str,
    marks: &mut BTreeMap<String, Mark>,
    order: &mut Vec<String>,
    trail: &mut Vec<String>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Black) => return Ok(()),
        Some(Mark::Grey) => {
            let mut path: Vec<String> = trail
                .iter()
                .skip_while(|n| n.as_str() != name)
                .cloned()
                .collect();
            path.push(name.to_string());
            return Err(WtdError::DependencyCycle { path });
        }
        None => {}
    }

    marks.insert(name.to_string(), Mark::Grey);
    trail.push(name.to_string());

    if let Some(ext) = catalog.get(name) {
        let mut deps = ext.manifest.dependencies.clone();
        deps.sort();
        for dep in &deps {
            visit(catalog, dep, marks, order, trail)?;
        }
    }

    trail.pop();
    marks.insert(name.to_string(), Mark::Black);
    order.push(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{Extension, Manifest, Source};

    fn manifest(name: &str, deps: &[&str], never: &[&str]) -> Extension {
        Extension {
            manifest: Manifest {
                name: name.to_string(),
                description: String::new(),
                dependencies: deps.iter().map(|s| s.to_string()).collect(),
                never_load: never.iter().map(|s| s.to_string()).collect(),
                always_load: false,
                auto_detect: Default::default(),
                version: None,
                platforms: None,
            },
            source: Source::Builtin,
            dockerfile: String::new(),
            compose: serde_yaml::Mapping::new(),
        }
    }

    fn catalog_of(exts: Vec<Extension>) -> Catalog {
        Catalog::from_extensions(exts)
    }

    fn roots(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let catalog = catalog_of(vec![
            manifest("a", &["b"], &[]),
            manifest("b", &["c"], &[]),
            manifest("c", &[], &[]),
        ]);
        let order = resolve(&catalog, &roots(&["a"])).unwrap();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn order_is_deterministic_regardless_of_input_order() {
        let catalog = catalog_of(vec![
            manifest("x", &["shared"], &[]),
            manifest("y", &["shared"], &[]),
            manifest("shared", &[], &[]),
        ]);
        let forward = resolve(&catalog, &roots(&["x", "y"])).unwrap();
        let backward = resolve(&catalog, &roots(&["y", "x"])).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, vec!["shared", "x", "y"]);
    }

    #[test]
    fn diamond_dependency_appears_once() {
        let catalog = catalog_of(vec![
            manifest("top", &["left", "right"], &[]),
            manifest("left", &["bottom"], &[]),
            manifest("right", &["bottom"], &[]),
            manifest("bottom", &[], &[]),
        ]);
        let order = resolve(&catalog, &roots(&["top"])).unwrap();
        assert_eq!(order, vec!["bottom", "left", "right", "top"]);
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let catalog = catalog_of(vec![
            manifest("a", &["b"], &[]),
            manifest("b", &["c"], &[]),
            manifest("c", &["a"], &[]),
        ]);
        let err = resolve(&catalog, &roots(&["a"])).unwrap_err();
        let WtdError::DependencyCycle { path } = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(path.first(), path.last());
        assert!(path.len() >= 3);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let catalog = catalog_of(vec![manifest("selfish", &["selfish"], &[])]);
        let err = resolve(&catalog, &roots(&["selfish"])).unwrap_err();
        assert!(matches!(err, WtdError::DependencyCycle { .. }));
    }

    #[test]
    fn never_load_is_symmetric() {
        // Only `a` declares the exclusion; requesting both must fail no
        // matter which side carries the declaration.
        let catalog = catalog_of(vec![
            manifest("a", &[], &["b"]),
            manifest("b", &[], &[]),
        ]);
        let err = resolve(&catalog, &roots(&["a", "b"])).unwrap_err();
        let WtdError::IncompatibleExtensions { a, b } = err else {
            panic!("expected incompatibility");
        };
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
    }

    #[test]
    fn never_load_triggers_through_dependencies() {
        let catalog = catalog_of(vec![
            manifest("top", &["hidden"], &[]),
            manifest("hidden", &[], &["other"]),
            manifest("other", &[], &[]),
        ]);
        let err = resolve(&catalog, &roots(&["top", "other"])).unwrap_err();
        assert!(matches!(err, WtdError::IncompatibleExtensions { .. }));
    }

    #[test]
    fn missing_dependency_is_reported() {
        let catalog = catalog_of(vec![manifest("a", &["ghost"], &[])]);
        let err = resolve(&catalog, &roots(&["a"])).unwrap_err();
        let WtdError::DependencyMissing {
            extension,
            dependency,
        } = err
        else {
            panic!("expected missing dependency");
        };
        assert_eq!(extension, "a");
        assert_eq!(dependency, "ghost");
    }

    #[test]
    fn unknown_root_is_a_catalog_error() {
        let catalog = catalog_of(vec![manifest("a", &[], &[])]);
        let err = resolve(&catalog, &roots(&["nope"])).unwrap_err();
        assert!(matches!(err, WtdError::CatalogInvalid { .. }));
    }

    #[test]
    fn root_set_merges_all_sources_and_honors_flags() {
        let catalog = Catalog::load(None).unwrap();
        let mut config = Config::from_env();
        config.no_gui = true;

        let set = root_set(
            &catalog,
            &["x11".to_string(), "uv".to_string()],
            &["ssh".to_string()],
            &["pixi".to_string()],
            &config,
        );

        // always-load trio plus requested, minus x11 (no_gui).
        assert!(set.contains("base"));
        assert!(set.contains("user"));
        assert!(set.contains("git-clone"));
        assert!(set.contains("uv"));
        assert!(set.contains("ssh"));
        assert!(set.contains("pixi"));
        assert!(!set.contains("x11"));
    }

    #[test]
    fn builtin_catalog_resolves_cleanly() {
        let catalog = Catalog::load(None).unwrap();
        let set = roots(&["base", "user", "git-clone", "uv"]);
        let order = resolve(&catalog, &set).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("base") < pos("user"));
        assert!(pos("user") < pos("git-clone"));
        assert!(pos("user") < pos("uv"));
    }
}
