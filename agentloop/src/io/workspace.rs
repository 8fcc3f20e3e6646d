//! The single directory every action is confined to.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::path::{display_relative, normalize_absolute, normalize_relative};

/// Content hashes of every regular file under the root, keyed by relative path.
pub type Snapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathEscape {
    #[error("empty path")]
    Empty,
    #[error("{0} is outside the workspace")]
    Outside(String),
    #[error("{0} resolves through a symlink outside the workspace")]
    Symlink(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create (if needed) and canonicalize the workspace root.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("create workspace {}", root.display()))?;
        let root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize workspace {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fails when a file cannot be created and removed in the root.
    pub fn probe_writable(&self) -> Result<()> {
        let probe = self
            .root
            .join(format!(".agentloop-probe-{}", std::process::id()));
        fs::write(&probe, b"probe").with_context(|| format!("write {}", probe.display()))?;
        fs::remove_file(&probe).with_context(|| format!("remove {}", probe.display()))?;
        Ok(())
    }

    /// Map a workspace-relative (or absolute, inside the root) path to an absolute path.
    ///
    /// The check is lexical first, then the deepest existing ancestor is canonicalized
    /// so a symlink cannot redirect the path outside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathEscape> {
        if path.trim().is_empty() {
            return Err(PathEscape::Empty);
        }
        let relative = if path.starts_with('/') {
            let absolute = normalize_absolute(Path::new(path));
            match absolute.strip_prefix(&self.root) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => return Err(PathEscape::Outside(path.to_string())),
            }
        } else {
            normalize_relative(path).ok_or_else(|| PathEscape::Outside(path.to_string()))?
        };
        let candidate = self.root.join(&relative);
        for ancestor in candidate.ancestors() {
            if fs::symlink_metadata(ancestor).is_err() {
                continue;
            }
            let real = fs::canonicalize(ancestor)
                .map_err(|_| PathEscape::Symlink(path.to_string()))?;
            if !real.starts_with(&self.root) {
                return Err(PathEscape::Symlink(path.to_string()));
            }
            break;
        }
        Ok(candidate)
    }

    /// Hash every regular file under the root. Symlinks are not followed.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut files = Snapshot::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(err = %err, "skipping unreadable workspace entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let contents = match fs::read(entry.path()) {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(err = %err, path = %entry.path().display(), "skipping unreadable file");
                    continue;
                }
            };
            files.insert(display_relative(relative), hex::encode(Sha256::digest(&contents)));
        }
        debug!(files = files.len(), "workspace snapshot");
        Ok(files)
    }

    /// Files created or modified since `baseline`, sorted.
    pub fn changed_since(&self, baseline: &Snapshot) -> Result<Vec<String>> {
        let current = self.snapshot()?;
        Ok(current
            .into_iter()
            .filter(|(path, hash)| baseline.get(path) != Some(hash))
            .map(|(path, _)| path)
            .collect())
    }

    /// Keep declared deliverables that exist inside the root, as normalized relative paths.
    pub fn verify_deliverables(&self, declared: &[String]) -> Vec<String> {
        let mut verified = Vec::new();
        for path in declared {
            match self.resolve(path) {
                Ok(resolved) if resolved.exists() => {
                    if let Ok(relative) = resolved.strip_prefix(&self.root) {
                        verified.push(display_relative(relative));
                    }
                }
                Ok(_) => warn!(path = %path, "declared deliverable does not exist; dropping"),
                Err(err) => warn!(path = %path, err = %err, "declared deliverable escapes the workspace; dropping"),
            }
        }
        verified
    }
}
