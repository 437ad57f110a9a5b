//! Lexical path helpers used before a file is opened.
//!
//! These never touch the filesystem except [`ensure_parent_dir`] and
//! [`same_file`].

use std::path::{Component, Path, PathBuf};

/// Normalize `path` lexically: drop `.` segments, fold `name/..` pairs and
/// redundant separators. Leading `..` segments of relative paths are kept;
/// `..` directly under the root is dropped.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                out.push(component.as_os_str());
                depth = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Create the directory that will contain `path`, if it is missing.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Whether `a` and `b` name the same file: equal after lexical
/// normalization, or resolving to the same canonical path (symlinks,
/// differently spelled existing paths).
#[must_use]
pub fn same_file(a: &Path, b: &Path) -> bool {
    if normalize(a) == normalize(b) {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
