//! One pipeline stage.
//!
//! A phase is an ordered position in a package's pipeline holding the
//! set of transformers that run logically in parallel at that position.
//! All members observe the same snapshot of available inputs; fan-out
//! (several transformers claiming the same primary) is allowed, and no
//! ordering is defined between members beyond the shared snapshot.
//!
//! Fresh invocations execute on scoped worker threads pulling from a
//! shared index, so independent transforms in a phase run concurrently
//! while memo hits cost nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::asset::{Asset, AssetId, Provenance};
use crate::pipeline::{ChainLookup, DeferredJob, JobKey, MemoCache, MemoEntry};
use crate::transform::{AssetLookup, RunMode, TransformContext, TransformError, Transformer};

/// An ordered stage in a package's pipeline.
pub struct Phase {
    /// Position within the pipeline.
    pub index: usize,
    /// Transformers running at this position.
    pub transformers: Vec<Arc<dyn Transformer>>,
}

impl Phase {
    /// Create a phase at `index`.
    pub fn new(index: usize, transformers: Vec<Arc<dyn Transformer>>) -> Self {
        Self { index, transformers }
    }

    /// Whether any member is eligible for `id` as a primary input.
    pub fn consumes(&self, id: &AssetId) -> bool {
        self.transformers.iter().any(|t| t.eligible(id))
    }
}

/// Outcome of one settled (non-deferred) job.
pub(crate) struct JobOutcome {
    pub key: JobKey,
    /// Output ids the transformer declared for this primary, used to
    /// pin failures to the assets they implicate.
    pub declared: Vec<AssetId>,
    pub result: Result<Vec<Arc<Asset>>, TransformError>,
}

/// Everything one phase run produced.
#[derive(Default)]
pub(crate) struct PhaseRun {
    /// Settled jobs: memo hits plus fresh invocations.
    pub outcomes: Vec<JobOutcome>,
    /// Lazy jobs captured for on-demand execution, with declared outputs.
    pub deferred: Vec<(Vec<AssetId>, DeferredJob)>,
    /// Every job considered, for memo pruning.
    pub seen: Vec<JobKey>,
    /// Number of transformer invocations actually executed.
    pub invocations: u64,
}

/// Run every eligible invocation of one phase against `inputs`.
///
/// `external` resolves secondary inputs that are not in this package's
/// snapshot (exported assets of dependency packages).
pub(crate) fn run_phase(
    phase: &Phase,
    inputs: &BTreeMap<AssetId, Arc<Asset>>,
    external: &dyn AssetLookup,
    memo: &mut MemoCache,
    workers: usize,
) -> PhaseRun {
    let lookup = ChainLookup { local: inputs, external };
    let mut run = PhaseRun::default();
    let mut fresh: Vec<(JobKey, Vec<AssetId>, Arc<dyn Transformer>, Arc<Asset>)> = Vec::new();

    for transformer in &phase.transformers {
        for (id, asset) in inputs {
            if !transformer.eligible(id) {
                continue;
            }

            let key = JobKey {
                phase: phase.index,
                transformer: transformer.name().to_string(),
                primary: id.clone(),
            };
            run.seen.push(key.clone());
            let declared = transformer.declared_outputs(id);

            if let Some(entry) = memo.get(&key) {
                if entry.is_valid(asset, &lookup) {
                    run.outcomes.push(JobOutcome {
                        key,
                        declared,
                        result: entry.outcome.clone(),
                    });
                    continue;
                }
            }

            match transformer.mode() {
                RunMode::Lazy => {
                    let job = DeferredJob {
                        key,
                        transformer: Arc::clone(transformer),
                        primary: Arc::clone(asset),
                    };
                    run.deferred.push((declared, job));
                }
                RunMode::Eager => {
                    fresh.push((key, declared, Arc::clone(transformer), Arc::clone(asset)));
                }
            }
        }
    }

    run.invocations = fresh.len() as u64;
    let executed = execute_fresh(&fresh, phase.index, &lookup, workers);

    for ((key, declared, _, primary), (result, requested)) in fresh.into_iter().zip(executed) {
        memo.insert(
            key.clone(),
            MemoEntry {
                primary_hash: primary.content_hash(),
                secondaries: observed_hashes(&requested, &lookup),
                outcome: result.clone(),
            },
        );
        run.outcomes.push(JobOutcome { key, declared, result });
    }

    run
}

/// Execute one invocation, fixing up output provenance.
pub(crate) fn invoke_job(
    transformer: &Arc<dyn Transformer>,
    primary: &Arc<Asset>,
    phase_index: usize,
    lookup: &dyn AssetLookup,
) -> (Result<Vec<Arc<Asset>>, TransformError>, Vec<AssetId>) {
    let mut ctx = TransformContext::new(lookup);
    let result = transformer.apply(primary, &mut ctx);
    let requested = ctx.into_requested();

    let result = result.map(|outputs| {
        outputs
            .into_iter()
            .map(|mut asset| {
                if let Provenance::Transformed { phase, .. } = &mut asset.provenance {
                    *phase = phase_index;
                }
                Arc::new(asset)
            })
            .collect()
    });

    (result, requested)
}

/// Current content hashes for a set of requested secondary ids.
pub(crate) fn observed_hashes(
    requested: &[AssetId],
    lookup: &dyn AssetLookup,
) -> Vec<(AssetId, Option<u64>)> {
    requested
        .iter()
        .map(|id| (id.clone(), lookup.lookup(id).map(|a| a.content_hash())))
        .collect()
}

type Invoked = (Result<Vec<Arc<Asset>>, TransformError>, Vec<AssetId>);

/// Run fresh jobs on scoped worker threads, preserving job order.
fn execute_fresh(
    fresh: &[(JobKey, Vec<AssetId>, Arc<dyn Transformer>, Arc<Asset>)],
    phase_index: usize,
    lookup: &ChainLookup<'_>,
    workers: usize,
) -> Vec<Invoked> {
    if fresh.is_empty() {
        return Vec::new();
    }

    if workers <= 1 || fresh.len() == 1 {
        return fresh
            .iter()
            .map(|(_, _, t, primary)| invoke_job(t, primary, phase_index, lookup))
            .collect();
    }

    let results: Mutex<Vec<(usize, Invoked)>> = Mutex::new(Vec::with_capacity(fresh.len()));
    let next = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..workers.min(fresh.len()) {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= fresh.len() {
                    break;
                }
                let (_, _, transformer, primary) = &fresh[i];
                let invoked = invoke_job(transformer, primary, phase_index, lookup);
                results.lock().unwrap_or_else(|e| e.into_inner()).push((i, invoked));
            });
        }
    });

    let mut collected = results.into_inner().unwrap_or_else(|e| e.into_inner());
    collected.sort_by_key(|(i, _)| *i);
    collected.into_iter().map(|(_, invoked)| invoked).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{EmptyLookup, RewriteTransformer};

    fn snapshot(parts: &[(&str, &str)]) -> BTreeMap<AssetId, Arc<Asset>> {
        parts
            .iter()
            .map(|(path, content)| {
                let id = AssetId::new("p", *path);
                (id.clone(), Arc::new(Asset::source(id, content.as_bytes().to_vec())))
            })
            .collect()
    }

    fn rewrite_phase(index: usize) -> Phase {
        Phase::new(index, vec![Arc::new(RewriteTransformer::new("txt", "out"))])
    }

    #[test]
    fn test_run_phase_produces_outputs() {
        let inputs = snapshot(&[("web/a.txt", "a"), ("web/b.css", "b")]);
        let mut memo = MemoCache::default();

        let run = run_phase(&rewrite_phase(0), &inputs, &EmptyLookup, &mut memo, 1);

        assert_eq!(run.invocations, 1);
        assert_eq!(run.outcomes.len(), 1);
        let outputs = run.outcomes[0].result.as_ref().unwrap();
        assert_eq!(outputs[0].id, AssetId::new("p", "web/a.out"));
    }

    #[test]
    fn test_memo_hit_skips_invocation() {
        let inputs = snapshot(&[("web/a.txt", "a")]);
        let mut memo = MemoCache::default();

        let first = run_phase(&rewrite_phase(0), &inputs, &EmptyLookup, &mut memo, 1);
        assert_eq!(first.invocations, 1);

        let second = run_phase(&rewrite_phase(0), &inputs, &EmptyLookup, &mut memo, 1);
        assert_eq!(second.invocations, 0);
        assert_eq!(second.outcomes.len(), 1);
    }

    #[test]
    fn test_memo_invalidated_by_content_change() {
        let mut memo = MemoCache::default();
        let phase = rewrite_phase(0);

        let run = run_phase(&phase, &snapshot(&[("web/a.txt", "v1")]), &EmptyLookup, &mut memo, 1);
        assert_eq!(run.invocations, 1);

        let run = run_phase(&phase, &snapshot(&[("web/a.txt", "v2")]), &EmptyLookup, &mut memo, 1);
        assert_eq!(run.invocations, 1);
    }

    #[test]
    fn test_provenance_carries_phase_index() {
        let inputs = snapshot(&[("web/a.txt", "a")]);
        let mut memo = MemoCache::default();

        let run = run_phase(&rewrite_phase(3), &inputs, &EmptyLookup, &mut memo, 1);
        let outputs = run.outcomes[0].result.as_ref().unwrap();
        match &outputs[0].provenance {
            Provenance::Transformed { phase, .. } => assert_eq!(*phase, 3),
            other => panic!("unexpected provenance: {:?}", other),
        }
    }

    #[test]
    fn test_lazy_jobs_are_deferred() {
        let phase =
            Phase::new(0, vec![Arc::new(RewriteTransformer::new("txt", "out").lazy())]);
        let inputs = snapshot(&[("web/a.txt", "a")]);
        let mut memo = MemoCache::default();

        let run = run_phase(&phase, &inputs, &EmptyLookup, &mut memo, 1);
        assert_eq!(run.invocations, 0);
        assert!(run.outcomes.is_empty());
        assert_eq!(run.deferred.len(), 1);
        assert_eq!(run.deferred[0].0, vec![AssetId::new("p", "web/a.out")]);
    }

    #[test]
    fn test_parallel_execution_matches_sequential() {
        let inputs = snapshot(&[
            ("web/a.txt", "a"),
            ("web/b.txt", "b"),
            ("web/c.txt", "c"),
            ("web/d.txt", "d"),
        ]);

        let mut memo_seq = MemoCache::default();
        let seq = run_phase(&rewrite_phase(0), &inputs, &EmptyLookup, &mut memo_seq, 1);

        let mut memo_par = MemoCache::default();
        let par = run_phase(&rewrite_phase(0), &inputs, &EmptyLookup, &mut memo_par, 4);

        assert_eq!(seq.invocations, 4);
        assert_eq!(par.invocations, 4);

        let collect = |run: &PhaseRun| {
            let mut ids: Vec<AssetId> = run
                .outcomes
                .iter()
                .flat_map(|o| o.result.as_ref().unwrap().iter().map(|a| a.id.clone()))
                .collect();
            ids.sort();
            ids
        };
        assert_eq!(collect(&seq), collect(&par));
    }

    #[test]
    fn test_phase_consumes() {
        let phase = rewrite_phase(0);
        assert!(phase.consumes(&AssetId::new("p", "web/a.txt")));
        assert!(!phase.consumes(&AssetId::new("p", "web/a.out")));
    }
}
