//! Configuration loading for `barge.toml`.

pub mod loader;
pub mod schema;

pub use loader::{load_config, validate, ConfigError, CONFIG_FILENAME};
pub use schema::{Config, PackageConfig, PhaseConfig, ProjectConfig, TransformerConfig};
