//! Auto-detection of extensions against a worktree.
//!
//! An extension matches when any one of its predicate classes hits:
//!
//! - a `files` regex matches the name of a regular file directly under the
//!   worktree root (not recursive);
//! - a `directories` regex matches a directory directly under the root;
//! - a `host_paths` entry exists on the host filesystem (`~` expands to
//!   the home directory);
//! - a `file_contents` entry names a file that exists under the worktree
//!   and contains one of the listed byte substrings.
//!
//! Matching is case-sensitive. Missing files are non-matches; I/O errors
//! while probing are logged and treated as non-matches.

use std::path::{Path, PathBuf};

use regex::Regex;

use super::{AutoDetect, Catalog};

/// Evaluate every catalog extension's predicates against a worktree,
/// returning matching names in catalog (name) order.
pub fn auto_detected(catalog: &Catalog, worktree: &Path) -> Vec<String> {
    let listing = DirListing::read(worktree);
    catalog
        .iter()
        .filter(|ext| {
            !ext.manifest.auto_detect.is_empty()
                && matches(&ext.manifest.auto_detect, worktree, &listing)
        })
        .map(|ext| {
            log::info!("auto-detected extension '{}'", ext.name());
            ext.name().to_string()
        })
        .collect()
}

/// Names of direct children of the worktree root, split by kind.
struct DirListing {
    files: Vec<String>,
    directories: Vec<String>,
}

impl DirListing {
    fn read(root: &Path) -> DirListing {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        match std::fs::read_dir(root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    match entry.file_type() {
                        Ok(kind) if kind.is_file() => files.push(name),
                        Ok(kind) if kind.is_dir() => directories.push(name),
                        _ => {}
                    }
                }
            }
            Err(err) => log::warn!("cannot list {}: {err}", root.display()),
        }
        files.sort();
        directories.sort();
        DirListing { files, directories }
    }
}

fn matches(detect: &AutoDetect, worktree: &Path, listing: &DirListing) -> bool {
    if any_pattern_matches(&detect.files, &listing.files) {
        return true;
    }
    if any_pattern_matches(&detect.directories, &listing.directories) {
        return true;
    }
    if detect.host_paths.iter().any(|p| expand_home(p).exists()) {
        return true;
    }
    detect
        .file_contents
        .iter()
        .any(|(filename, substrings)| file_contains(&worktree.join(filename), substrings))
}

fn any_pattern_matches(patterns: &[String], names: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        // Patterns were validated at catalog load; a failure here means the
        // catalog was constructed by hand in tests.
        let Ok(re) = Regex::new(pattern) else {
            return false;
        };
        names.iter().any(|name| re.is_match(name))
    })
}

fn file_contains(path: &Path, substrings: &[String]) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return false,
        Err(err) => {
            log::warn!("cannot read {}: {err}", path.display());
            return false;
        }
    };
    substrings
        .iter()
        .any(|needle| contains_bytes(&bytes, needle.as_bytes()))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Expand a leading `~` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home::home_dir()
    {
        return home.join(rest);
    }
    if path == "~"
        && let Some(home) = home::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}
