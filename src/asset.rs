//! Asset identity and content.
//!
//! An [`AssetId`] names a slot in the build graph: a path scoped to the
//! package that owns it. An [`Asset`] is one immutable revision of that
//! slot, either read from disk (a primary source) or produced by a
//! transformer. Replacing the content at an id creates a new `Asset`
//! value; published assets are never mutated in place.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a source or derived asset: a package name plus a path
/// relative to that package's root, with forward-slash separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    /// Name of the owning package.
    pub package: String,
    /// Path within the package, e.g. `web/main.txt`.
    pub path: String,
}

impl AssetId {
    /// Create an asset id.
    pub fn new(package: impl Into<String>, path: impl Into<String>) -> Self {
        Self { package: package.into(), path: path.into() }
    }

    /// The file extension of the path, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext)
        }
    }

    /// A new id with the extension replaced. If the path has no
    /// extension, `ext` is appended.
    pub fn with_extension(&self, ext: &str) -> AssetId {
        let path = match self.extension() {
            Some(old) => {
                let stem = &self.path[..self.path.len() - old.len() - 1];
                format!("{}.{}", stem, ext)
            }
            None => format!("{}.{}", self.path, ext),
        };
        AssetId::new(self.package.clone(), path)
    }

    /// Whether the path sits under `root` (a directory prefix such as
    /// `lib` or `web`).
    pub fn is_under(&self, root: &str) -> bool {
        let root = root.trim_end_matches('/');
        self.path == root || self.path.starts_with(&format!("{}/", root))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.package, self.path)
    }
}

/// Error parsing an asset id from its `package|path` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid asset id {0:?}: expected \"package|path\"")]
pub struct ParseAssetIdError(pub String);

impl FromStr for AssetId {
    type Err = ParseAssetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('|') {
            Some((package, path)) if !package.is_empty() && !path.is_empty() => {
                Ok(AssetId::new(package, path))
            }
            _ => Err(ParseAssetIdError(s.to_string())),
        }
    }
}

/// Where an asset came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Read from disk or supplied by the initial scan.
    Source,
    /// Produced by a transformer at the given phase.
    Transformed {
        /// Name of the transformer that produced it.
        transformer: String,
        /// Phase index within the owning package's pipeline.
        phase: usize,
    },
}

/// One immutable revision of an asset slot.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Identity of the slot this revision fills.
    pub id: AssetId,
    /// Content bytes, shared between all readers.
    pub content: Arc<Vec<u8>>,
    /// Who produced this revision.
    pub provenance: Provenance,
    /// FNV-1a hash of the content, computed at construction.
    hash: u64,
}

impl Asset {
    /// Create a primary source asset.
    pub fn source(id: AssetId, content: Vec<u8>) -> Self {
        let hash = fnv1a_hash(&content);
        Self { id, content: Arc::new(content), provenance: Provenance::Source, hash }
    }

    /// Create a transformer-produced asset.
    pub fn transformed(id: AssetId, content: Vec<u8>, transformer: &str, phase: usize) -> Self {
        let hash = fnv1a_hash(&content);
        Self {
            id,
            content: Arc::new(content),
            provenance: Provenance::Transformed { transformer: transformer.to_string(), phase },
            hash,
        }
    }

    /// Content hash used for incremental-reuse checks.
    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// Content interpreted as UTF-8, lossily.
    pub fn content_str(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// A primary-source change delivered by the scanner or the watcher.
#[derive(Debug, Clone)]
pub enum SourceChange {
    /// The source was created or its content replaced.
    Put {
        /// Slot being filled.
        id: AssetId,
        /// New content.
        content: Vec<u8>,
    },
    /// The source was deleted.
    Remove(AssetId),
    /// A whole directory was deleted: remove the named slot and every
    /// source under it. Watchers emit this for vanished paths, since a
    /// deleted directory reports one event with no trace of the files
    /// it held.
    RemoveTree(AssetId),
}

impl SourceChange {
    /// The id this change applies to.
    pub fn id(&self) -> &AssetId {
        match self {
            SourceChange::Put { id, .. } => id,
            SourceChange::Remove(id) => id,
            SourceChange::RemoveTree(id) => id,
        }
    }
}

/// FNV-1a over `data`.
pub(crate) fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
