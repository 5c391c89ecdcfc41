//! Configuration loading and validation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::schema::Config;

/// Default configuration filename, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "barge.toml";

/// Invalid phase/transformer/package configuration. Fatal: aborts
/// startup rather than producing a partially-configured graph.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file missing.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    /// IO error reading the file.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML syntax or schema error.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A transformer kind with no registered factory.
    #[error("unknown transformer kind {kind:?}")]
    UnknownTransformer {
        /// The unregistered kind.
        kind: String,
    },
    /// A transformer option the factory requires was missing.
    #[error("transformer {kind:?} is missing required option {option:?}")]
    MissingOption {
        /// Transformer kind.
        kind: String,
        /// Missing option key.
        option: String,
    },
    /// A dependency on a package not declared under `[packages]`.
    #[error("package {package:?} depends on undeclared package {dependency:?}")]
    UnknownDependency {
        /// Depending package.
        package: String,
        /// Missing dependency name.
        dependency: String,
    },
    /// The package dependency graph contains a cycle.
    #[error("dependency cycle involving packages: {}", packages.join(", "))]
    DependencyCycle {
        /// Packages left unordered after topological sorting.
        packages: Vec<String>,
    },
    /// `[project] name` names a package not declared under `[packages]`.
    #[error("project package {0:?} is not declared under [packages]")]
    MissingProjectPackage(String),
}

/// Load and validate a config file.
///
/// Returns the parsed config plus the project root (the directory
/// containing the config file), against which package roots resolve.
pub fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf), ConfigError> {
    let path = path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    let text = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&text)?;
    validate(&config)?;

    let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let root = if root.as_os_str().is_empty() { PathBuf::from(".") } else { root };
    Ok((config, root))
}

/// Structural validation: the project package exists and every declared
/// dependency resolves to a declared package.
///
/// Cycle detection happens when the package graph is assembled, where
/// the topological order is computed anyway.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if !config.packages.contains_key(&config.project.name) {
        return Err(ConfigError::MissingProjectPackage(config.project.name.clone()));
    }

    let declared: BTreeSet<&str> = config.packages.keys().map(String::as_str).collect();
    for (name, package) in &config.packages {
        for dep in &package.dependencies {
            if !declared.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    package: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
                [project]
                name = "app"
                [packages.app]
            "#,
        );

        let (config, root) = load_config(Some(&path)).unwrap();
        assert_eq!(config.project.name, "app");
        assert_eq!(root, dir.path());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/barge.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "not valid toml [[[");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_project_package_must_exist() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
                [project]
                name = "app"
                [packages.other]
            "#,
        );
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectPackage(_)));
    }

    #[test]
    fn test_unknown_dependency() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
                [project]
                name = "app"
                [packages.app]
                dependencies = ["ghost"]
            "#,
        );
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
    }
}
