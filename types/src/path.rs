//! Path normalization for document identity.
//!
//! Every path that enters the engine (from the client, from compiler spans,
//! from export records) passes through [`normalize_path`], so the same file
//! always maps to the same key.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// the preceding component. Does not touch the filesystem, so paths to files
/// that no longer exist normalize the same way as live ones.
///
/// On Windows the result is additionally case-folded.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` above the root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    let normalized: PathBuf = out.iter().collect();
    fold_case(normalized)
}

/// Resolve `path` against `root` when relative, then normalize.
#[must_use]
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&root.join(path))
    }
}

#[cfg(windows)]
fn fold_case(path: PathBuf) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

#[cfg(not(windows))]
fn fold_case(path: PathBuf) -> PathBuf {
    path
}
