//! The transformer contract.
//!
//! A [`Transformer`] is a pure function from one primary input asset
//! (plus any secondary inputs it requests by id) to zero or more output
//! assets. Transformers declare the file extensions that make them
//! eligible for a primary input; eligibility is a filter, not a
//! guarantee. A transformer may inspect content and decline by
//! returning no outputs, in which case the phase runner passes the
//! input through unchanged.
//!
//! Secondary-input requests are recorded by the [`TransformContext`] so
//! the scheduler can re-run the transform when any requested asset
//! changes, including requests that resolved to nothing.

pub mod concat;
pub mod registry;
pub mod rewrite;

pub use concat::ConcatTransformer;
pub use registry::TransformerRegistry;
pub use rewrite::RewriteTransformer;

use std::fmt;
use std::sync::Arc;

use crate::asset::{Asset, AssetId};

/// When a transformer's work is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run whenever an eligible input is (re)built.
    Eager,
    /// Run only when one of the declared outputs is actually requested.
    Lazy,
}

/// A source location attached to a transform error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// 1-indexed line.
    pub line: usize,
    /// 1-indexed column.
    pub column: usize,
}

/// A single transformer invocation failed.
///
/// Isolated to the implicated output assets; independent assets in the
/// same build pass continue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformError {
    /// The primary input the transformer was running on.
    pub asset: AssetId,
    /// Human-readable message.
    pub message: String,
    /// Optional source location within the primary input.
    pub span: Option<Span>,
}

impl TransformError {
    /// Create an error without location information.
    pub fn new(asset: AssetId, message: impl Into<String>) -> Self {
        Self { asset, message: message.into(), span: None }
    }

    /// Create an error pointing at a line/column in the primary input.
    pub fn with_span(asset: AssetId, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self { asset, message: message.into(), span: Some(Span { line, column }) }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error in {}", self.asset)?;
        if let Some(span) = self.span {
            write!(f, ":{}:{}", span.line, span.column)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for TransformError {}

/// Read-only view used to resolve secondary inputs.
///
/// Implementations must be consistent for the duration of one phase:
/// every transformer in a phase observes the same snapshot.
pub trait AssetLookup: Sync {
    /// Resolve an id to its current asset, if visible and available.
    fn lookup(&self, id: &AssetId) -> Option<Arc<Asset>>;
}

/// A lookup with no assets; useful for single-package tests.
pub struct EmptyLookup;

impl AssetLookup for EmptyLookup {
    fn lookup(&self, _id: &AssetId) -> Option<Arc<Asset>> {
        None
    }
}

/// Per-invocation context handed to [`Transformer::apply`].
///
/// Records every secondary-input request as a dependency edge, whether
/// or not the request resolved.
pub struct TransformContext<'a> {
    lookup: &'a dyn AssetLookup,
    requested: Vec<AssetId>,
}

impl<'a> TransformContext<'a> {
    /// Create a context over `lookup`.
    pub fn new(lookup: &'a dyn AssetLookup) -> Self {
        Self { lookup, requested: Vec::new() }
    }

    /// Request a secondary input by id.
    ///
    /// Returns `None` when the id is not visible from the running
    /// package or does not exist; the request is recorded either way.
    pub fn secondary(&mut self, id: &AssetId) -> Option<Arc<Asset>> {
        self.requested.push(id.clone());
        self.lookup.lookup(id)
    }

    /// Consume the context, yielding the recorded dependency edges.
    pub fn into_requested(self) -> Vec<AssetId> {
        self.requested
    }
}

/// A pipeline stage: pure from (primary, secondaries-at-call-time) to
/// outputs, so the same input state is assumed to reproduce identically.
pub trait Transformer: std::fmt::Debug + Send + Sync {
    /// Short name used in provenance, conflict reports, and logs.
    fn name(&self) -> &str;

    /// Primary-input extensions (without dot) this transformer is
    /// eligible for. An empty slice means eligible for everything.
    fn extensions(&self) -> &[&str];

    /// Whether the transformer runs eagerly or only on demand.
    fn mode(&self) -> RunMode {
        RunMode::Eager
    }

    /// The output ids this transformer will produce for `input`.
    ///
    /// Lazy transformers must declare their outputs so the graph can
    /// create deferred slots without running them; eager transformers
    /// may declare theirs so that a failed run can be pinned to the
    /// outputs it would have produced.
    fn declared_outputs(&self, _input: &AssetId) -> Vec<AssetId> {
        Vec::new()
    }

    /// Run the transform.
    fn apply(
        &self,
        input: &Asset,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Vec<Asset>, TransformError>;

    /// Eligibility check for a primary input, by extension.
    fn eligible(&self, id: &AssetId) -> bool {
        let exts = self.extensions();
        exts.is_empty() || id.extension().is_some_and(|e| exts.contains(&e))
    }
}
