//! Output materialization for one-shot builds.
//!
//! Writes the built serve-scope assets to the output directory. A
//! failed build writes nothing, so a previous good output tree is
//! never partially overwritten.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::graph::{BuildResult, PackageGraph};

/// Error type for output operations
#[derive(Debug)]
pub enum OutputError {
    /// IO error during file operations
    Io(PathBuf, io::Error),
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Io(path, e) => write!(f, "Failed to write {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Io(_, e) => Some(e),
        }
    }
}

/// Write every ready asset under the project package's serve directory
/// into `out_dir`, preserving relative paths.
///
/// Skipped entirely when `result` carries errors; returns the paths
/// written.
pub fn materialize(
    graph: &PackageGraph,
    config: &Config,
    result: &BuildResult,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, OutputError> {
    if !result.succeeded() {
        return Ok(Vec::new());
    }

    let serve_dir = &config.project.serve_dir;
    let mut written = Vec::new();
    for asset in graph.assets_under(&config.project.name, serve_dir) {
        let relative = asset.id.path.strip_prefix(&format!("{}/", serve_dir));
        let Some(relative) = relative else {
            continue;
        };
        let target = out_dir.join(relative);
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OutputError::Io(parent.to_path_buf(), e))?;
            }
        }
        std::fs::write(&target, asset.content.as_slice())
            .map_err(|e| OutputError::Io(target.clone(), e))?;
        written.push(target);
    }
    Ok(written)
}
