//! Concatenation transformer.
//!
//! A small bundler: the primary input is a `.list` manifest naming one
//! asset per line, and the output is a `.bundle` asset whose content is
//! the concatenation of the named assets. The named assets are fetched
//! as secondary inputs, which makes this the main exerciser of the
//! secondary-edge invalidation machinery and the cross-package
//! visibility rule.

use crate::asset::{Asset, AssetId};
use crate::transform::{TransformContext, TransformError, Transformer};

/// Default primary-input extension.
pub const LIST_EXTENSION: &str = "list";

/// Concatenates the assets named by a `.list` manifest.
///
/// Each non-empty, non-`#` line of the manifest is either a path within
/// the same package or a fully-qualified `package|path` id. A line that
/// names a missing or non-visible asset fails the whole bundle with an
/// error pointing at the offending line.
#[derive(Debug, Clone, Default)]
pub struct ConcatTransformer;

impl ConcatTransformer {
    /// Create a concat transformer.
    pub fn new() -> Self {
        Self
    }

    fn parse_line(package: &str, line: &str) -> Result<AssetId, String> {
        if line.contains('|') {
            line.parse::<AssetId>().map_err(|e| e.to_string())
        } else {
            Ok(AssetId::new(package, line))
        }
    }
}

impl Transformer for ConcatTransformer {
    fn name(&self) -> &str {
        "concat"
    }

    fn extensions(&self) -> &[&str] {
        &[LIST_EXTENSION]
    }

    fn declared_outputs(&self, input: &AssetId) -> Vec<AssetId> {
        vec![input.with_extension("bundle")]
    }

    fn apply(
        &self,
        input: &Asset,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Asset>, TransformError> {
        let manifest = input.content_str();
        let mut bundle: Vec<u8> = Vec::new();

        for (lineno, raw) in manifest.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let id = Self::parse_line(&input.id.package, line).map_err(|msg| {
                TransformError::with_span(input.id.clone(), lineno + 1, 1, msg)
            })?;

            match ctx.secondary(&id) {
                Some(asset) => bundle.extend_from_slice(&asset.content),
                None => {
                    return Err(TransformError::with_span(
                        input.id.clone(),
                        lineno + 1,
                        1,
                        format!("bundled asset not found: {}", id),
                    ));
                }
            }
        }

        let out = input.id.with_extension("bundle");
        Ok(vec![Asset::transformed(out, bundle, self.name(), 0)])
    }
}
