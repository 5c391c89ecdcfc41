//! Per-package phase pipeline.
//!
//! Each package owns an [`AssetCascade`]: its primary sources plus an
//! ordered list of [`Phase`]s. Phases run strictly in order; within a
//! phase, every eligible (transformer, primary input) pair executes
//! against the same snapshot, concurrently where possible. Outputs plus
//! passed-through inputs form the next phase's snapshot.
//!
//! Incrementality lives in the memo cache: each invocation is keyed by
//! its phase, transformer, and primary input, and remembered along with
//! the content hashes of everything it consumed. A rebuild re-invokes a
//! transformer only when one of those hashes changed, so an edit to one
//! source re-runs just that file's lineage.

pub mod cascade;
pub mod phase;

pub use cascade::{AssetCascade, CascadeResolve};
pub use phase::Phase;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::asset::{Asset, AssetId};
use crate::transform::{AssetLookup, TransformError, Transformer};

/// A per-asset build failure, aggregated into the top-level result.
///
/// Multi-file error sets are deliberately unordered; callers get a set,
/// never a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AssetError {
    /// A transformer invocation failed.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// Two producers emitted the same output id in one phase run.
    #[error("conflicting outputs for {id}: produced by both {first} and {second}")]
    Conflict {
        /// The contested output id.
        id: AssetId,
        /// First claiming producer.
        first: String,
        /// Second claiming producer.
        second: String,
    },
}

impl AssetError {
    /// The asset id this error is attached to.
    pub fn asset(&self) -> &AssetId {
        match self {
            AssetError::Transform(e) => &e.asset,
            AssetError::Conflict { id, .. } => id,
        }
    }
}

/// Identity of one transformer invocation within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct JobKey {
    /// Phase index.
    pub phase: usize,
    /// Transformer name.
    pub transformer: String,
    /// Primary input id.
    pub primary: AssetId,
}

impl JobKey {
    /// Producer label used in conflict reports.
    pub fn producer(&self) -> String {
        format!("{} on {}", self.transformer, self.primary)
    }
}

/// A lazy invocation captured for on-demand execution.
#[derive(Clone)]
pub(crate) struct DeferredJob {
    pub key: JobKey,
    pub transformer: Arc<dyn Transformer>,
    pub primary: Arc<Asset>,
}

/// Remembered outcome of one invocation, for incremental reuse.
pub(crate) struct MemoEntry {
    /// Content hash of the primary input at invocation time.
    pub primary_hash: u64,
    /// Every secondary id requested, with the content hash observed
    /// (`None` when the request resolved to nothing).
    pub secondaries: Vec<(AssetId, Option<u64>)>,
    /// The invocation's outcome.
    pub outcome: Result<Vec<Arc<Asset>>, TransformError>,
}

impl MemoEntry {
    /// Whether the remembered outcome still holds for the current
    /// primary content and the current state of every recorded
    /// secondary input.
    pub fn is_valid(&self, primary: &Asset, lookup: &dyn AssetLookup) -> bool {
        if primary.content_hash() != self.primary_hash {
            return false;
        }
        self.secondaries
            .iter()
            .all(|(id, hash)| lookup.lookup(id).map(|a| a.content_hash()) == *hash)
    }
}

/// Memoized invocation outcomes for one cascade.
#[derive(Default)]
pub(crate) struct MemoCache {
    entries: HashMap<JobKey, MemoEntry>,
}

impl MemoCache {
    pub fn get(&self, key: &JobKey) -> Option<&MemoEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: JobKey, entry: MemoEntry) {
        self.entries.insert(key, entry);
    }

    /// Drop entries for jobs that no longer exist (source removed or
    /// pipeline reshaped).
    pub fn retain_seen(&mut self, seen: &HashSet<JobKey>) {
        self.entries.retain(|key, _| seen.contains(key));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Chains a local snapshot in front of an external lookup.
pub(crate) struct ChainLookup<'a> {
    pub local: &'a BTreeMap<AssetId, Arc<Asset>>,
    pub external: &'a dyn AssetLookup,
}

impl AssetLookup for ChainLookup<'_> {
    fn lookup(&self, id: &AssetId) -> Option<Arc<Asset>> {
        self.local.get(id).cloned().or_else(|| self.external.lookup(id))
    }
}
