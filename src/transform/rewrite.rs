//! Extension-rewrite transformer.
//!
//! The workhorse of tests and demo pipelines: consumes assets with one
//! extension and emits the same path with another, appending a suffix
//! to the content. Chained instances (`txt` to `mid` to `out`) exercise
//! multi-phase propagation without a real compiler.

use crate::asset::{Asset, AssetId};
use crate::transform::{RunMode, TransformContext, TransformError, Transformer};

/// Rewrites `from`-extension assets to `to`-extension assets.
#[derive(Debug, Clone)]
pub struct RewriteTransformer {
    name: String,
    from: String,
    extensions: Vec<&'static str>,
    to: String,
    suffix: Vec<u8>,
    lazy: bool,
}

impl RewriteTransformer {
    /// Create a rewrite from one extension to another.
    ///
    /// The output content is the input content followed by `.` and the
    /// target extension, e.g. `"contents"` in `file.txt` becomes
    /// `"contents.out"` in `file.out` for a `txt` to `out` rewrite.
    pub fn new(from: &str, to: &str) -> Self {
        let suffix = format!(".{}", to).into_bytes();
        Self {
            name: format!("rewrite[{}->{}]", from, to),
            // Leaked once per configured transformer; the trait hands
            // out `&[&str]` and pipelines live for the process.
            extensions: vec![Box::leak(from.to_string().into_boxed_str())],
            from: from.to_string(),
            to: to.to_string(),
            suffix,
            lazy: false,
        }
    }

    /// Replace the appended suffix.
    pub fn with_suffix(mut self, suffix: impl Into<Vec<u8>>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Defer running until an output is requested.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Source extension.
    pub fn from_extension(&self) -> &str {
        &self.from
    }

    /// Target extension.
    pub fn to_extension(&self) -> &str {
        &self.to
    }
}

impl Transformer for RewriteTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn extensions(&self) -> &[&str] {
        &self.extensions
    }

    fn mode(&self) -> RunMode {
        if self.lazy {
            RunMode::Lazy
        } else {
            RunMode::Eager
        }
    }

    fn declared_outputs(&self, input: &AssetId) -> Vec<AssetId> {
        vec![input.with_extension(&self.to)]
    }

    fn apply(
        &self,
        input: &Asset,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Asset>, TransformError> {
        let mut content = input.content.as_ref().clone();
        content.extend_from_slice(&self.suffix);
        let out = input.id.with_extension(&self.to);
        Ok(vec![Asset::transformed(out, content, self.name(), 0)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::EmptyLookup;

    #[test]
    fn test_rewrite_appends_suffix() {
        let t = RewriteTransformer::new("txt", "out");
        let input = Asset::source(AssetId::new("p", "web/file.txt"), b"contents".to_vec());

        let mut ctx = TransformContext::new(&EmptyLookup);
        let outputs = t.apply(&input, &mut ctx).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].id, AssetId::new("p", "web/file.out"));
        assert_eq!(outputs[0].content.as_slice(), b"contents.out");
    }

    #[test]
    fn test_rewrite_declares_outputs() {
        let t = RewriteTransformer::new("txt", "out");
        let declared = t.declared_outputs(&AssetId::new("p", "web/file.txt"));
        assert_eq!(declared, vec![AssetId::new("p", "web/file.out")]);
    }

    #[test]
    fn test_rewrite_eligibility() {
        let t = RewriteTransformer::new("txt", "out");
        assert!(t.eligible(&AssetId::new("p", "web/a.txt")));
        assert!(!t.eligible(&AssetId::new("p", "web/a.out")));
    }

    #[test]
    fn test_custom_suffix() {
        let t = RewriteTransformer::new("txt", "out").with_suffix(b"!".to_vec());
        let input = Asset::source(AssetId::new("p", "a.txt"), b"x".to_vec());
        let mut ctx = TransformContext::new(&EmptyLookup);
        let outputs = t.apply(&input, &mut ctx).unwrap();
        assert_eq!(outputs[0].content.as_slice(), b"x!");
    }

    #[test]
    fn test_lazy_mode() {
        assert_eq!(RewriteTransformer::new("txt", "out").mode(), RunMode::Eager);
        assert_eq!(RewriteTransformer::new("txt", "out").lazy().mode(), RunMode::Lazy);
    }
}
