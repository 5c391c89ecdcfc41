//! Per-package asset cascade.
//!
//! An [`AssetCascade`] owns one package's primary sources and the
//! running state of its phase pipeline. Building replays the phases in
//! order against the current sources; the memo cache makes the replay
//! incremental, re-invoking only transforms whose recorded inputs
//! changed. The visible result is a slot per asset id: ready content,
//! a recorded error, or a deferred lazy job awaiting demand.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::asset::{Asset, AssetId};
use crate::pipeline::phase::{invoke_job, observed_hashes, run_phase, Phase};
use crate::pipeline::{AssetError, ChainLookup, DeferredJob, MemoCache, MemoEntry};
use crate::transform::AssetLookup;

/// Resolution of one asset id within a built cascade.
#[derive(Clone)]
pub enum CascadeResolve {
    /// Content is ready to read.
    Ready(Arc<Asset>),
    /// A lazy job will produce it on demand; call
    /// [`AssetCascade::force`].
    Deferred,
    /// The producing transform failed.
    Error(AssetError),
    /// Nothing in this package produces the id.
    NotFound,
}

/// Current state of one output slot.
enum OutSlot {
    Ready(Arc<Asset>),
    Error(AssetError),
    Deferred(DeferredJob),
}

/// One package's sources plus its phase pipeline state.
pub struct AssetCascade {
    package: String,
    phases: Vec<Phase>,
    sources: BTreeMap<AssetId, Arc<Asset>>,
    slots: HashMap<AssetId, OutSlot>,
    memo: MemoCache,
    errors: HashSet<AssetError>,
    invocations: u64,
    dirty: bool,
}

impl AssetCascade {
    /// Create a cascade for `package` with the given pipeline.
    pub fn new(package: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            package: package.into(),
            phases,
            sources: BTreeMap::new(),
            slots: HashMap::new(),
            memo: MemoCache::default(),
            errors: HashSet::new(),
            invocations: 0,
            dirty: true,
        }
    }

    /// Package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Whether sources changed since the last build.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the cascade dirty without touching its sources; used when a
    /// dependency package's exports may have changed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Errors recorded by the last build, including forced lazy jobs.
    pub fn errors(&self) -> &HashSet<AssetError> {
        &self.errors
    }

    /// Total transformer invocations executed by this cascade.
    pub fn transform_invocations(&self) -> u64 {
        self.invocations
    }

    /// Create or replace a primary source. A write with unchanged
    /// content is ignored, so editor save bursts do not dirty the
    /// cascade.
    pub fn set_source(&mut self, id: AssetId, content: Vec<u8>) {
        let asset = Asset::source(id.clone(), content);
        if let Some(existing) = self.sources.get(&id) {
            if existing.content_hash() == asset.content_hash() {
                return;
            }
        }
        self.sources.insert(id, Arc::new(asset));
        self.dirty = true;
    }

    /// Remove a primary source. Derived assets whose only producer
    /// consumed it disappear on the next build.
    pub fn remove_source(&mut self, id: &AssetId) {
        if self.sources.remove(id).is_some() {
            self.dirty = true;
        }
    }

    /// Remove the source at `id` plus every source under it, treating
    /// the path as a directory prefix.
    pub fn remove_sources_under(&mut self, id: &AssetId) {
        let doomed: Vec<AssetId> =
            self.sources.keys().filter(|s| s.is_under(&id.path)).cloned().collect();
        for victim in doomed {
            self.sources.remove(&victim);
            self.dirty = true;
        }
    }

    /// Current primary source ids.
    pub fn source_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.sources.keys()
    }

    /// Run all phases in order against the current sources.
    ///
    /// `external` resolves secondary inputs from dependency packages;
    /// `workers` bounds in-phase concurrency.
    pub fn build(&mut self, external: &dyn AssetLookup, workers: usize) {
        let mut snapshot = self.sources.clone();
        let mut slots: HashMap<AssetId, OutSlot> = HashMap::new();
        let mut errors: HashSet<AssetError> = HashSet::new();
        let mut seen: HashSet<super::JobKey> = HashSet::new();

        for index in 0..self.phases.len() {
            let run = run_phase(&self.phases[index], &snapshot, external, &mut self.memo, workers);
            self.invocations += run.invocations;
            seen.extend(run.seen.iter().cloned());

            // Claim output ids; a second claim is a conflict recorded
            // against the id, and neither producer's value is published.
            let mut producers: BTreeMap<AssetId, String> = BTreeMap::new();
            let mut conflicts: BTreeMap<AssetId, AssetError> = BTreeMap::new();
            let mut staged: Vec<(AssetId, Arc<Asset>)> = Vec::new();
            let mut staged_deferred: Vec<(AssetId, DeferredJob)> = Vec::new();

            let mut claim = |id: &AssetId,
                             producer: String,
                             producers: &mut BTreeMap<AssetId, String>,
                             conflicts: &mut BTreeMap<AssetId, AssetError>| {
                match producers.get(id) {
                    Some(first) => {
                        conflicts.entry(id.clone()).or_insert_with(|| AssetError::Conflict {
                            id: id.clone(),
                            first: first.clone(),
                            second: producer,
                        });
                        false
                    }
                    None => {
                        producers.insert(id.clone(), producer);
                        true
                    }
                }
            };

            for outcome in &run.outcomes {
                match &outcome.result {
                    Ok(outputs) => {
                        for asset in outputs {
                            if claim(
                                &asset.id,
                                outcome.key.producer(),
                                &mut producers,
                                &mut conflicts,
                            ) {
                                staged.push((asset.id.clone(), Arc::clone(asset)));
                            }
                        }
                    }
                    Err(error) => {
                        errors.insert(AssetError::Transform(error.clone()));
                        for out in &outcome.declared {
                            slots.insert(
                                out.clone(),
                                OutSlot::Error(AssetError::Transform(error.clone())),
                            );
                            snapshot.remove(out);
                        }
                    }
                }
            }

            // Lazy jobs: force now when a later phase would consume an
            // output, otherwise leave a deferred slot awaiting demand.
            for (declared, job) in run.deferred {
                let consumed_later =
                    self.phases[index + 1..].iter().any(|p| declared.iter().any(|d| p.consumes(d)));

                if consumed_later {
                    let lookup = ChainLookup { local: &snapshot, external };
                    let (result, requested) = invoke_job(&job.transformer, &job.primary, index, &lookup);
                    self.invocations += 1;
                    self.memo.insert(
                        job.key.clone(),
                        MemoEntry {
                            primary_hash: job.primary.content_hash(),
                            secondaries: observed_hashes(&requested, &lookup),
                            outcome: result.clone(),
                        },
                    );
                    match result {
                        Ok(outputs) => {
                            for asset in &outputs {
                                if claim(
                                    &asset.id,
                                    job.key.producer(),
                                    &mut producers,
                                    &mut conflicts,
                                ) {
                                    staged.push((asset.id.clone(), Arc::clone(asset)));
                                }
                            }
                        }
                        Err(error) => {
                            errors.insert(AssetError::Transform(error.clone()));
                            for out in &declared {
                                slots.insert(
                                    out.clone(),
                                    OutSlot::Error(AssetError::Transform(error.clone())),
                                );
                                snapshot.remove(out);
                            }
                        }
                    }
                } else {
                    for out in declared {
                        if claim(&out, job.key.producer(), &mut producers, &mut conflicts) {
                            staged_deferred.push((out, job.clone()));
                        }
                    }
                }
            }

            let conflicted: BTreeSet<AssetId> = conflicts.keys().cloned().collect();

            for (id, asset) in staged {
                if !conflicted.contains(&id) {
                    snapshot.insert(id.clone(), Arc::clone(&asset));
                    slots.insert(id, OutSlot::Ready(asset));
                }
            }
            for (id, job) in staged_deferred {
                if !conflicted.contains(&id) {
                    slots.insert(id, OutSlot::Deferred(job));
                }
            }
            for (id, error) in conflicts {
                errors.insert(error.clone());
                snapshot.remove(&id);
                slots.insert(id, OutSlot::Error(error));
            }
        }

        // Everything still in the final snapshot passes through:
        // sources and intermediate outputs remain addressable unless a
        // later slot (error) shadowed them.
        for (id, asset) in snapshot {
            slots.entry(id).or_insert(OutSlot::Ready(asset));
        }

        self.slots = slots;
        self.errors = errors;
        self.memo.retain_seen(&seen);
        self.dirty = false;
    }

    /// Resolve an id against the built cascade.
    pub fn get(&self, id: &AssetId) -> CascadeResolve {
        match self.slots.get(id) {
            Some(OutSlot::Ready(asset)) => CascadeResolve::Ready(Arc::clone(asset)),
            Some(OutSlot::Error(error)) => CascadeResolve::Error(error.clone()),
            Some(OutSlot::Deferred(_)) => CascadeResolve::Deferred,
            None => CascadeResolve::NotFound,
        }
    }

    /// Force a deferred slot: run the captured lazy job and publish its
    /// outputs. Forcing any one declared output settles all of them.
    pub fn force(&mut self, id: &AssetId, external: &dyn AssetLookup) -> CascadeResolve {
        let job = match self.slots.get(id) {
            Some(OutSlot::Deferred(job)) => job.clone(),
            _ => return self.get(id),
        };

        let declared = job.transformer.declared_outputs(&job.key.primary);
        let ready: BTreeMap<AssetId, Arc<Asset>> = self
            .slots
            .iter()
            .filter_map(|(slot_id, slot)| match slot {
                OutSlot::Ready(asset) => Some((slot_id.clone(), Arc::clone(asset))),
                _ => None,
            })
            .collect();

        let (result, secondaries) = {
            let lookup = ChainLookup { local: &ready, external };
            let (result, requested) = invoke_job(&job.transformer, &job.primary, job.key.phase, &lookup);
            let secondaries = observed_hashes(&requested, &lookup);
            (result, secondaries)
        };
        self.invocations += 1;
        self.memo.insert(
            job.key.clone(),
            MemoEntry {
                primary_hash: job.primary.content_hash(),
                secondaries,
                outcome: result.clone(),
            },
        );

        match result {
            Ok(outputs) => {
                let produced: BTreeSet<AssetId> = outputs.iter().map(|a| a.id.clone()).collect();
                for asset in outputs {
                    self.slots.insert(asset.id.clone(), OutSlot::Ready(asset));
                }
                // Declared outputs the transformer declined to produce.
                for out in &declared {
                    if !produced.contains(out) {
                        self.slots.remove(out);
                    }
                }
                self.get(id)
            }
            Err(error) => {
                let error = AssetError::Transform(error);
                self.errors.insert(error.clone());
                for out in &declared {
                    self.slots.insert(out.clone(), OutSlot::Error(error.clone()));
                }
                CascadeResolve::Error(error)
            }
        }
    }

    /// Ids currently holding deferred slots.
    pub fn deferred_ids(&self) -> Vec<AssetId> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                OutSlot::Deferred(_) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ready assets whose path sits under `root`.
    pub fn assets_under(&self, root: &str) -> Vec<Arc<Asset>> {
        let mut assets: Vec<Arc<Asset>> = self
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                OutSlot::Ready(asset) if id.is_under(root) => Some(Arc::clone(asset)),
                _ => None,
            })
            .collect();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{
        ConcatTransformer, EmptyLookup, RewriteTransformer, TransformContext, TransformError,
        Transformer,
    };

    fn cascade_with(phases: Vec<Vec<Arc<dyn Transformer>>>) -> AssetCascade {
        let phases = phases
            .into_iter()
            .enumerate()
            .map(|(i, transformers)| Phase::new(i, transformers))
            .collect();
        AssetCascade::new("myapp", phases)
    }

    fn ready_content(cascade: &AssetCascade, path: &str) -> String {
        match cascade.get(&AssetId::new("myapp", path)) {
            CascadeResolve::Ready(asset) => asset.content_str(),
            _ => panic!("asset myapp|{} not ready", path),
        }
    }

    #[test]
    fn test_single_phase_rewrite() {
        let mut cascade = cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out"))]]);
        cascade.set_source(AssetId::new("myapp", "web/file.txt"), b"contents".to_vec());
        cascade.build(&EmptyLookup, 1);

        assert_eq!(ready_content(&cascade, "web/file.out"), "contents.out");
        // The source passes through.
        assert_eq!(ready_content(&cascade, "web/file.txt"), "contents");
        assert!(cascade.errors().is_empty());
    }

    #[test]
    fn test_phases_chain_in_order() {
        let mut cascade = cascade_with(vec![
            vec![Arc::new(RewriteTransformer::new("txt", "mid"))],
            vec![Arc::new(RewriteTransformer::new("mid", "out"))],
        ]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"x".to_vec());
        cascade.build(&EmptyLookup, 1);

        assert_eq!(ready_content(&cascade, "web/a.mid"), "x.mid");
        assert_eq!(ready_content(&cascade, "web/a.out"), "x.mid.out");
    }

    #[test]
    fn test_incremental_rebuild_skips_unchanged_lineage() {
        let mut cascade = cascade_with(vec![
            vec![Arc::new(RewriteTransformer::new("txt", "mid"))],
            vec![Arc::new(RewriteTransformer::new("mid", "out"))],
        ]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.set_source(AssetId::new("myapp", "web/b.txt"), b"b".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert_eq!(cascade.transform_invocations(), 4);

        // Editing only a.txt re-runs only a's lineage: two invocations.
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a2".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert_eq!(cascade.transform_invocations(), 6);
        assert_eq!(ready_content(&cascade, "web/a.out"), "a2.mid.out");
        assert_eq!(ready_content(&cascade, "web/b.out"), "b.mid.out");
    }

    #[test]
    fn test_noop_rebuild_invokes_nothing() {
        let mut cascade = cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out"))]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);
        let before = cascade.transform_invocations();

        cascade.build(&EmptyLookup, 1);
        assert_eq!(cascade.transform_invocations(), before);
    }

    #[test]
    fn test_unchanged_write_does_not_dirty() {
        let mut cascade = cascade_with(vec![]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert!(!cascade.is_dirty());

        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        assert!(!cascade.is_dirty());

        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"changed".to_vec());
        assert!(cascade.is_dirty());
    }

    #[test]
    fn test_removed_source_removes_derived_assets() {
        let mut cascade = cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out"))]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.out")),
            CascadeResolve::Ready(_)
        ));

        cascade.remove_source(&AssetId::new("myapp", "web/a.txt"));
        cascade.build(&EmptyLookup, 1);
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.out")),
            CascadeResolve::NotFound
        ));
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.txt")),
            CascadeResolve::NotFound
        ));
    }

    #[derive(Debug)]
    struct FailingTransformer;

    impl Transformer for FailingTransformer {
        fn name(&self) -> &str {
            "failing"
        }

        fn extensions(&self) -> &[&str] {
            &["bad"]
        }

        fn declared_outputs(&self, input: &AssetId) -> Vec<AssetId> {
            vec![input.with_extension("out")]
        }

        fn apply(
            &self,
            input: &Asset,
            _ctx: &mut TransformContext<'_>,
        ) -> Result<Vec<Asset>, TransformError> {
            Err(TransformError::with_span(input.id.clone(), 1, 1, "syntax error"))
        }
    }

    #[test]
    fn test_failure_is_isolated_to_its_lineage() {
        let mut cascade = cascade_with(vec![vec![
            Arc::new(RewriteTransformer::new("txt", "out")),
            Arc::new(FailingTransformer),
        ]]);
        cascade.set_source(AssetId::new("myapp", "web/good.txt"), b"fine".to_vec());
        cascade.set_source(AssetId::new("myapp", "web/broken.bad"), b"nope".to_vec());
        cascade.build(&EmptyLookup, 1);

        // The independent asset still built.
        assert_eq!(ready_content(&cascade, "web/good.out"), "fine.out");
        // The failure is pinned to the declared output.
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/broken.out")),
            CascadeResolve::Error(_)
        ));
        assert_eq!(cascade.errors().len(), 1);
    }

    #[test]
    fn test_two_failures_both_reported() {
        let mut cascade = cascade_with(vec![vec![Arc::new(FailingTransformer)]]);
        cascade.set_source(AssetId::new("myapp", "web/one.bad"), b"1".to_vec());
        cascade.set_source(AssetId::new("myapp", "web/sub/two.bad"), b"2".to_vec());
        cascade.build(&EmptyLookup, 1);

        let assets: HashSet<String> =
            cascade.errors().iter().map(|e| e.asset().path.clone()).collect();
        assert_eq!(cascade.errors().len(), 2);
        assert!(assets.contains("web/one.bad"));
        assert!(assets.contains("web/sub/two.bad"));
    }

    #[test]
    fn test_same_output_id_is_a_conflict() {
        let mut cascade = cascade_with(vec![vec![
            Arc::new(RewriteTransformer::new("txt", "out")),
            Arc::new(RewriteTransformer::new("txt", "out").with_suffix(b"!".to_vec())),
        ]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);

        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.out")),
            CascadeResolve::Error(AssetError::Conflict { .. })
        ));
        assert_eq!(cascade.errors().len(), 1);
    }

    #[test]
    fn test_concat_rebuilds_when_secondary_changes() {
        let mut cascade = cascade_with(vec![vec![Arc::new(ConcatTransformer::new())]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"aaa".to_vec());
        cascade.set_source(AssetId::new("myapp", "web/all.list"), b"web/a.txt\n".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert_eq!(ready_content(&cascade, "web/all.bundle"), "aaa");

        // The manifest itself is unchanged, but its secondary changed.
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"AAA".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert_eq!(ready_content(&cascade, "web/all.bundle"), "AAA");
    }

    #[test]
    fn test_lazy_transformer_runs_only_on_demand() {
        let mut cascade =
            cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out").lazy())]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);

        assert_eq!(cascade.transform_invocations(), 0);
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.out")),
            CascadeResolve::Deferred
        ));

        let resolved = cascade.force(&AssetId::new("myapp", "web/a.out"), &EmptyLookup);
        assert!(matches!(resolved, CascadeResolve::Ready(_)));
        assert_eq!(cascade.transform_invocations(), 1);
        assert_eq!(ready_content(&cascade, "web/a.out"), "a.out");
    }

    #[test]
    fn test_forced_lazy_output_stays_fresh_while_inputs_unchanged() {
        let mut cascade =
            cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out").lazy())]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);
        cascade.force(&AssetId::new("myapp", "web/a.out"), &EmptyLookup);

        // Rebuild with unchanged inputs: stays materialized, no re-run.
        cascade.build(&EmptyLookup, 1);
        assert_eq!(cascade.transform_invocations(), 1);
        assert_eq!(ready_content(&cascade, "web/a.out"), "a.out");

        // Changing the input reverts the slot to deferred.
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a2".to_vec());
        cascade.build(&EmptyLookup, 1);
        assert!(matches!(
            cascade.get(&AssetId::new("myapp", "web/a.out")),
            CascadeResolve::Deferred
        ));
    }

    #[test]
    fn test_lazy_forced_eagerly_when_later_phase_consumes_it() {
        let mut cascade = cascade_with(vec![
            vec![Arc::new(RewriteTransformer::new("txt", "mid").lazy())],
            vec![Arc::new(RewriteTransformer::new("mid", "out"))],
        ]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);

        // The lazy phase-0 job had to run so phase 1 could consume it.
        assert_eq!(ready_content(&cascade, "web/a.out"), "a.mid.out");
    }

    #[test]
    fn test_assets_under() {
        let mut cascade = cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out"))]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.set_source(AssetId::new("myapp", "lib/b.txt"), b"b".to_vec());
        cascade.build(&EmptyLookup, 1);

        let web: Vec<String> =
            cascade.assets_under("web").iter().map(|a| a.id.path.clone()).collect();
        assert_eq!(web, vec!["web/a.out", "web/a.txt"]);
    }

    #[test]
    fn test_idempotent_resolution() {
        let mut cascade = cascade_with(vec![vec![Arc::new(RewriteTransformer::new("txt", "out"))]]);
        cascade.set_source(AssetId::new("myapp", "web/a.txt"), b"a".to_vec());
        cascade.build(&EmptyLookup, 1);

        let first = match cascade.get(&AssetId::new("myapp", "web/a.out")) {
            CascadeResolve::Ready(a) => a,
            _ => panic!("not ready"),
        };
        let second = match cascade.get(&AssetId::new("myapp", "web/a.out")) {
            CascadeResolve::Ready(a) => a,
            _ => panic!("not ready"),
        };
        assert!(Arc::ptr_eq(&first, &second));
    }
}
