//! Transformer registry.
//!
//! Maps a configuration `kind` key to a factory producing a value that
//! satisfies the [`Transformer`] contract. Construction is explicit:
//! an unknown kind is a fatal configuration error, there is no runtime
//! type discovery.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, TransformerConfig};
use crate::transform::{ConcatTransformer, RewriteTransformer, Transformer};

/// Factory for one transformer kind.
pub type TransformerFactory =
    Box<dyn Fn(&TransformerConfig) -> Result<Arc<dyn Transformer>, ConfigError> + Send + Sync>;

/// Registry of transformer factories keyed by configuration kind.
pub struct TransformerRegistry {
    factories: HashMap<String, TransformerFactory>,
}

impl TransformerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// A registry with the built-in transformers registered:
    /// `rewrite` and `concat`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("rewrite", |cfg| {
            let from = cfg.require_str("from")?;
            let to = cfg.require_str("to")?;
            let mut t = RewriteTransformer::new(from, to);
            if let Some(suffix) = cfg.get_str("suffix") {
                t = t.with_suffix(suffix.as_bytes().to_vec());
            }
            if cfg.get_bool("lazy").unwrap_or(false) {
                t = t.lazy();
            }
            Ok(Arc::new(t) as Arc<dyn Transformer>)
        });

        registry.register("concat", |_cfg| Ok(Arc::new(ConcatTransformer::new()) as _));

        registry
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&TransformerConfig) -> Result<Arc<dyn Transformer>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Instantiate a transformer from its configuration.
    pub fn create(&self, cfg: &TransformerConfig) -> Result<Arc<dyn Transformer>, ConfigError> {
        match self.factories.get(&cfg.kind) {
            Some(factory) => factory(cfg),
            None => Err(ConfigError::UnknownTransformer { kind: cfg.kind.clone() }),
        }
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
