//! Lexical path helpers shared by the validator and the workspace.
//!
//! Everything here is string/component arithmetic. No filesystem access.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a workspace-relative path.
///
/// Returns `None` if a `..` component would climb above the starting directory.
/// `.` components and empty segments are dropped; the result never contains `..`.
pub fn normalize_relative(path: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.iter().collect())
}

/// Lexically normalize an absolute path (`..` at the root stays at the root).
pub fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Render a relative path with `/` separators for reports and comparisons.
pub fn display_relative(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
