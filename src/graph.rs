//! Package graph coordination.
//!
//! A [`PackageGraph`] holds one [`AssetCascade`] per configured package
//! and builds them in dependency order, so a package's transformers can
//! read the exported assets of the packages it depends on. Visibility
//! is scoped twice: a package sees only its transitive dependencies,
//! and of those only the assets under their public roots.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use crate::asset::{Asset, AssetId, SourceChange};
use crate::config::{Config, ConfigError};
use crate::pipeline::{AssetCascade, AssetError, CascadeResolve, Phase};
use crate::transform::{AssetLookup, TransformerRegistry};

/// Resolution of one asset id against the whole graph.
#[derive(Clone)]
pub enum Resolved {
    /// Content is ready to read.
    Available(Arc<Asset>),
    /// The producing transform failed or conflicted.
    Error(AssetError),
    /// No package produces the id.
    NotFound,
}

/// Outcome of one complete build pass.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    /// Every error recorded across all cascades, unordered.
    pub errors: HashSet<AssetError>,
}

impl BuildResult {
    /// True when no cascade recorded an error.
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        if self.succeeded() {
            "Build completed successfully".to_string()
        } else {
            format!("Build completed with {} errors", self.errors.len())
        }
    }

    /// Error messages sorted for stable display.
    pub fn sorted_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        messages.sort();
        messages
    }
}

/// All cascades plus the dependency topology between them.
pub struct PackageGraph {
    cascades: BTreeMap<String, AssetCascade>,
    /// Transitive dependency closure per package, excluding itself.
    visible: BTreeMap<String, BTreeSet<String>>,
    /// Reverse edges: package to the packages that depend on it.
    dependents: BTreeMap<String, Vec<String>>,
    public_roots: BTreeMap<String, Vec<String>>,
    /// Dependency-order build sequence.
    order: Vec<String>,
    workers: usize,
}

/// Read view over the rest of the graph while one cascade builds.
///
/// Only ready assets under a dependency's public roots resolve;
/// deferred slots and errors are invisible to secondary lookups.
struct GraphView<'a> {
    cascades: &'a BTreeMap<String, AssetCascade>,
    visible: &'a BTreeSet<String>,
    public_roots: &'a BTreeMap<String, Vec<String>>,
}

impl AssetLookup for GraphView<'_> {
    fn lookup(&self, id: &AssetId) -> Option<Arc<Asset>> {
        if !self.visible.contains(&id.package) {
            return None;
        }
        let roots = self.public_roots.get(&id.package)?;
        if !roots.iter().any(|root| id.is_under(root)) {
            return None;
        }
        match self.cascades.get(&id.package)?.get(id) {
            CascadeResolve::Ready(asset) => Some(asset),
            _ => None,
        }
    }
}

impl PackageGraph {
    /// Assemble the graph from configuration, instantiating each
    /// package's pipeline through the transformer registry.
    pub fn from_config(config: &Config, registry: &TransformerRegistry) -> Result<Self, ConfigError> {
        let mut cascades = BTreeMap::new();
        let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut public_roots = BTreeMap::new();

        for (name, package) in &config.packages {
            for dep in &package.dependencies {
                if !config.packages.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        package: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
            deps.insert(name.clone(), package.dependencies.clone());
            public_roots.insert(name.clone(), config.public_roots(name));

            let mut phases = Vec::with_capacity(package.phases.len());
            for (index, phase) in package.phases.iter().enumerate() {
                let mut transformers = Vec::with_capacity(phase.transformers.len());
                for transformer in &phase.transformers {
                    transformers.push(registry.create(transformer)?);
                }
                phases.push(Phase::new(index, transformers));
            }
            cascades.insert(name.clone(), AssetCascade::new(name.clone(), phases));
        }

        let order = topo_order(&deps)?;
        let visible = closures(&deps);

        Ok(Self {
            cascades,
            visible,
            dependents,
            public_roots,
            order,
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        })
    }

    /// Override the in-phase worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Packages in dependency order.
    pub fn build_order(&self) -> &[String] {
        &self.order
    }

    /// Total transformer invocations executed so far.
    pub fn transform_invocations(&self) -> u64 {
        self.cascades.values().map(|c| c.transform_invocations()).sum()
    }

    /// Apply a batch of source changes, dirtying the owning packages
    /// and everything downstream of them.
    pub fn apply_changes(&mut self, changes: Vec<SourceChange>) {
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for change in changes {
            let package = change.id().package.clone();
            let Some(cascade) = self.cascades.get_mut(&package) else {
                continue;
            };
            match change {
                SourceChange::Put { id, content } => cascade.set_source(id, content),
                SourceChange::Remove(id) => cascade.remove_source(&id),
                SourceChange::RemoveTree(id) => cascade.remove_sources_under(&id),
            }
            if cascade.is_dirty() {
                touched.insert(package);
            }
        }

        // A dirty package may change its exports, so dependents must
        // revalidate too. Their memo caches keep that cheap.
        let mut queue: VecDeque<String> = touched.into_iter().collect();
        let mut dirtied: BTreeSet<String> = BTreeSet::new();
        while let Some(package) = queue.pop_front() {
            if !dirtied.insert(package.clone()) {
                continue;
            }
            if let Some(downstream) = self.dependents.get(&package) {
                queue.extend(downstream.iter().cloned());
            }
        }
        for package in dirtied {
            if let Some(cascade) = self.cascades.get_mut(&package) {
                cascade.mark_dirty();
            }
        }
    }

    /// Whether any package needs a build.
    pub fn is_dirty(&self) -> bool {
        self.cascades.values().any(|c| c.is_dirty())
    }

    fn view_for<'a>(
        cascades: &'a BTreeMap<String, AssetCascade>,
        visible: &'a BTreeMap<String, BTreeSet<String>>,
        public_roots: &'a BTreeMap<String, Vec<String>>,
        package: &str,
    ) -> GraphView<'a> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        GraphView {
            cascades,
            visible: visible.get(package).unwrap_or(&EMPTY),
            public_roots,
        }
    }

    /// Build every dirty package in dependency order.
    ///
    /// `interrupt` is polled between packages; returning true abandons
    /// the pass with no result, leaving already-built packages current
    /// and the rest dirty. With `force_deferred` every lazy slot is
    /// materialized after its package builds, as a one-shot build needs.
    pub fn build_pass(
        &mut self,
        force_deferred: bool,
        interrupt: &mut dyn FnMut() -> bool,
    ) -> Option<BuildResult> {
        for name in self.order.clone() {
            if interrupt() {
                return None;
            }
            let Some(mut cascade) = self.cascades.remove(&name) else {
                continue;
            };
            if cascade.is_dirty() {
                let view =
                    Self::view_for(&self.cascades, &self.visible, &self.public_roots, &name);
                cascade.build(&view, self.workers);
            }
            if force_deferred {
                for id in cascade.deferred_ids() {
                    let view =
                        Self::view_for(&self.cascades, &self.visible, &self.public_roots, &name);
                    cascade.force(&id, &view);
                }
            }
            self.cascades.insert(name, cascade);
        }

        let mut result = BuildResult::default();
        for cascade in self.cascades.values() {
            result.errors.extend(cascade.errors().iter().cloned());
        }
        Some(result)
    }

    /// Build everything, forcing lazy slots. Never interrupted.
    pub fn build_all(&mut self) -> BuildResult {
        let mut never = || false;
        self.build_pass(true, &mut never).unwrap_or_default()
    }

    /// Resolve one id, building whatever is stale first and forcing the
    /// slot if it is lazy.
    pub fn get(&mut self, id: &AssetId) -> Resolved {
        if self.is_dirty() {
            let mut never = || false;
            self.build_pass(false, &mut never);
        }

        let Some(mut cascade) = self.cascades.remove(&id.package) else {
            return Resolved::NotFound;
        };
        let resolved = match cascade.get(id) {
            CascadeResolve::Deferred => {
                let view = Self::view_for(
                    &self.cascades,
                    &self.visible,
                    &self.public_roots,
                    &id.package,
                );
                cascade.force(id, &view)
            }
            other => other,
        };
        self.cascades.insert(id.package.clone(), cascade);

        match resolved {
            CascadeResolve::Ready(asset) => Resolved::Available(asset),
            CascadeResolve::Error(error) => Resolved::Error(error),
            CascadeResolve::Deferred | CascadeResolve::NotFound => Resolved::NotFound,
        }
    }

    /// Ready assets of one package under a path root.
    pub fn assets_under(&self, package: &str, root: &str) -> Vec<Arc<Asset>> {
        self.cascades.get(package).map(|c| c.assets_under(root)).unwrap_or_default()
    }
}

/// Kahn topological order over the dependency edges.
fn topo_order(deps: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>, ConfigError> {
    // A dependency listed twice is still a single edge.
    let edges: BTreeMap<&str, BTreeSet<&str>> = deps
        .iter()
        .map(|(name, d)| (name.as_str(), d.iter().map(String::as_str).collect()))
        .collect();
    let mut remaining: BTreeMap<&str, usize> =
        edges.iter().map(|(name, d)| (*name, d.len())).collect();
    let mut order = Vec::with_capacity(deps.len());
    let mut ready: VecDeque<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();

    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());
        for (&dependent, d) in &edges {
            if d.contains(name) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }
        remaining.remove(name);
    }

    if order.len() != deps.len() {
        let mut stuck: Vec<String> = deps
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect();
        stuck.sort();
        return Err(ConfigError::DependencyCycle { packages: stuck });
    }
    Ok(order)
}

/// Transitive dependency closure per package, excluding the package
/// itself.
fn closures(deps: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, BTreeSet<String>> {
    let mut result = BTreeMap::new();
    for name in deps.keys() {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<&str> = deps[name].iter().map(String::as_str).collect();
        while let Some(dep) = queue.pop_front() {
            if closure.insert(dep.to_string()) {
                if let Some(next) = deps.get(dep) {
                    queue.extend(next.iter().map(String::as_str));
                }
            }
        }
        result.insert(name.clone(), closure);
    }
    result
}
