//! Source file discovery.
//!
//! Walks each package's source root with glob patterns and turns the
//! files found into source-change batches the graph can ingest. The
//! same path-to-id mapping is reused by the watcher when files change
//! at runtime.

use std::path::{Path, PathBuf};

use glob::glob;

use crate::asset::{AssetId, SourceChange};
use crate::config::Config;

/// Error during source discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    InvalidPattern(String, glob::PatternError),
    /// IO error while reading a source file
    Io(PathBuf, std::io::Error),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidPattern(pattern, err) => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, err)
            }
            DiscoveryError::Io(path, err) => {
                write!(f, "Failed to read {}: {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Discover every source file of every configured package.
///
/// Returns `Put` changes in sorted id order, ready for
/// `PackageGraph::apply_changes`.
pub fn discover_all_sources(
    project_root: &Path,
    config: &Config,
) -> Result<Vec<SourceChange>, DiscoveryError> {
    let mut changes = Vec::new();
    for package in config.packages.keys() {
        changes.extend(discover_package_sources(project_root, config, package)?);
    }
    Ok(changes)
}

/// Discover the source files of one package.
pub fn discover_package_sources(
    project_root: &Path,
    config: &Config,
    package: &str,
) -> Result<Vec<SourceChange>, DiscoveryError> {
    let package_root = project_root.join(config.package_root(package));
    let out_dir = project_root.join(&config.project.out_dir);

    let pattern = package_root.join("**/*");
    let pattern_str = pattern.to_string_lossy().to_string();
    let paths = glob(&pattern_str)
        .map_err(|e| DiscoveryError::InvalidPattern(pattern_str.clone(), e))?;

    let mut changes = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                // Log but continue on glob errors
                eprintln!("Warning: error reading path: {}", e);
                continue;
            }
        };
        if !path.is_file() || is_excluded(&path, &package_root, &out_dir) {
            continue;
        }
        let Some(relative) = relative_asset_path(&path, &package_root) else {
            continue;
        };
        let content =
            std::fs::read(&path).map_err(|e| DiscoveryError::Io(path.clone(), e))?;
        changes.push(SourceChange::Put { id: AssetId::new(package, relative), content });
    }

    changes.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(changes)
}

/// Map an absolute filesystem path to the asset id it backs, if any.
///
/// Picks the package whose root is the longest prefix of the path, so
/// a package nested inside the project root claims its own files.
pub fn asset_id_for_path(project_root: &Path, config: &Config, path: &Path) -> Option<AssetId> {
    let out_dir = project_root.join(&config.project.out_dir);

    let mut best: Option<(usize, AssetId)> = None;
    for package in config.packages.keys() {
        let package_root = project_root.join(config.package_root(package));
        if is_excluded(path, &package_root, &out_dir) {
            continue;
        }
        let Some(relative) = relative_asset_path(path, &package_root) else {
            continue;
        };
        let depth = package_root.components().count();
        if best.as_ref().map(|(d, _)| depth > *d).unwrap_or(true) {
            best = Some((depth, AssetId::new(package, relative)));
        }
    }
    best.map(|(_, id)| id)
}

/// Relative path below `root`, normalized to forward slashes.
fn relative_asset_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Build outputs and dotfiles never become sources.
fn is_excluded(path: &Path, package_root: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    match path.strip_prefix(package_root) {
        Ok(relative) => relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.')),
        Err(_) => false,
    }
}
