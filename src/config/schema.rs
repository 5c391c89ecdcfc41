//! Project configuration schema.
//!
//! A `barge.toml` declares the project package, the package graph, and
//! each package's phase pipeline:
//!
//! ```toml
//! [project]
//! name = "myapp"
//! serve_dir = "web"
//! out_dir = "build"
//!
//! [packages.myapp]
//! root = "."
//! dependencies = ["widgets"]
//!
//! [[packages.myapp.phases]]
//! transformers = [{ kind = "rewrite", from = "txt", to = "out" }]
//!
//! [packages.widgets]
//! root = "vendor/widgets"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Project-wide settings.
    pub project: ProjectConfig,
    /// All packages in the graph, keyed by name.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageConfig>,
}

/// Project-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Name of the root package; must appear under `[packages]`.
    pub name: String,
    /// Directory within the root package that the dev server maps URLs
    /// into and the one-shot build materializes.
    #[serde(default = "default_serve_dir")]
    pub serve_dir: String,
    /// Output directory for one-shot builds, relative to the project root.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    /// Filesystem-event debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Default dev-server port.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// One package in the graph.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PackageConfig {
    /// Source root, relative to the config file. Defaults to the
    /// package name as a directory.
    #[serde(default)]
    pub root: Option<String>,
    /// Packages whose exported assets this package's transformers may
    /// read.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Exported roots: only assets under these directories are visible
    /// to dependent packages. Defaults to `["lib"]`, plus the serve
    /// directory for the project package.
    #[serde(default)]
    pub public: Option<Vec<String>>,
    /// Ordered phase pipeline.
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

/// One phase: a set of transformers that run against the same snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PhaseConfig {
    /// Transformers in this phase.
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

/// One transformer instance: a registry kind plus free-form options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformerConfig {
    /// Registry key selecting the factory.
    pub kind: String,
    /// Kind-specific options, passed through to the factory.
    #[serde(flatten)]
    pub options: toml::value::Table,
}

impl TransformerConfig {
    /// String option, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Boolean option, if present.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }

    /// String option, or a `MissingOption` config error.
    pub fn require_str(&self, key: &str) -> Result<&str, super::ConfigError> {
        self.get_str(key).ok_or_else(|| super::ConfigError::MissingOption {
            kind: self.kind.clone(),
            option: key.to_string(),
        })
    }
}

impl Config {
    /// Source root of a package, relative to the project root.
    pub fn package_root(&self, package: &str) -> String {
        self.packages
            .get(package)
            .and_then(|p| p.root.clone())
            .unwrap_or_else(|| package.to_string())
    }

    /// Exported roots of a package.
    pub fn public_roots(&self, package: &str) -> Vec<String> {
        if let Some(public) = self.packages.get(package).and_then(|p| p.public.clone()) {
            return public;
        }
        if package == self.project.name {
            vec!["lib".to_string(), self.project.serve_dir.clone()]
        } else {
            vec!["lib".to_string()]
        }
    }
}

fn default_serve_dir() -> String {
    "web".to_string()
}

fn default_out_dir() -> String {
    "build".to_string()
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_port() -> u16 {
    8080
}
