//! Initial context files listed in the task.

use std::fs;

use serde::Serialize;
use tracing::{debug, warn};

use crate::io::workspace::Workspace;

/// A context file as it appears in the task message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextFile {
    /// Path as written in the task.
    pub path: String,
    pub contents: String,
}

/// Read every listed file from the workspace. Missing, unreadable or escaping
/// paths are logged and skipped; they never stop the run.
pub fn load_context_files(workspace: &Workspace, paths: &[String]) -> Vec<ContextFile> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let resolved = match workspace.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(path = %path, err = %err, "context file escapes the workspace; skipping");
                continue;
            }
        };
        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path, err = %err, "context file unreadable; skipping");
                continue;
            }
        };
        debug!(path = %path, bytes = bytes.len(), "loaded context file");
        files.push(ContextFile {
            path: path.clone(),
            contents: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    files
}
