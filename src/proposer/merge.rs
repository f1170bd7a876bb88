//! Merge: recombine two descendants of a common ancestor.
//!
//! When two candidates on the Pareto front descend from the same ancestor
//! and changed different components, a merged candidate takes each
//! descendant's changes. Components both descendants rewrote come from the
//! higher-scoring one.
//!
//! The proposer keeps the scheduling counters the engine drives:
//! `merges_due`, `total_merges_tested` and `last_iter_found_new_program`.

use std::collections::BTreeSet;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use tracing::{Span, debug, info, instrument};

use crate::adapter::{self, Adapter};
use crate::error::{GepaError, GepaResult};
use crate::pareto;
use crate::state::{GepaState, lineage};
use crate::types::{Candidate, CandidateProposal, ProposalTag};

use super::ProposeNewCandidate;

/// Pair and ancestor sampling attempts per proposal.
pub const MAX_MERGE_ATTEMPTS: usize = 10;

/// A merge that was attempted: `(id1, id2, ancestor)`.
type MergeTriple = (usize, usize, usize);

/// A merged program, described by which candidate each component came from.
type MergeDescriptor = (usize, usize, Vec<usize>);

pub struct MergeProposer<'a, A: Adapter> {
    adapter: &'a A,
    valset: &'a [A::Example],
    use_merge: bool,
    max_merge_invocations: usize,
    subsample_size: usize,
    rng: StdRng,

    /// Merges scheduled but not yet attempted.
    pub merges_due: usize,
    /// Merge proposals produced so far.
    pub total_merges_tested: usize,
    /// Set by the engine when a candidate was accepted.
    pub last_iter_found_new_program: bool,

    triples_tried: Vec<MergeTriple>,
    merges_performed: Vec<MergeDescriptor>,
}

impl<'a, A: Adapter> MergeProposer<'a, A> {
    pub fn new(
        adapter: &'a A,
        valset: &'a [A::Example],
        use_merge: bool,
        max_merge_invocations: usize,
        seed: u64,
    ) -> Self {
        Self {
            adapter,
            valset,
            use_merge,
            max_merge_invocations,
            subsample_size: 5,
            rng: StdRng::seed_from_u64(seed),
            merges_due: 0,
            total_merges_tested: 0,
            last_iter_found_new_program: false,
            triples_tried: Vec::new(),
            merges_performed: Vec::new(),
        }
    }

    pub fn with_subsample_size(mut self, k: usize) -> Self {
        self.subsample_size = k;
        self
    }

    /// Whether the eligibility gate is open.
    pub fn is_due(&self) -> bool {
        self.use_merge
            && self.last_iter_found_new_program
            && self.merges_due > 0
            && self.total_merges_tested < self.max_merge_invocations
    }

    /// Schedule one more merge while under the invocation cap.
    pub fn schedule(&mut self) {
        if self.use_merge && self.total_merges_tested < self.max_merge_invocations {
            self.merges_due += 1;
        }
    }

    /// Count a produced merge proposal against the schedule.
    pub fn record_tested(&mut self) {
        self.merges_due = self.merges_due.saturating_sub(1);
        self.total_merges_tested += 1;
    }

    /// Sample a `(id1, id2, ancestor)` triple with `id1 < id2`.
    ///
    /// Pairs where one is an ancestor of the other are rejected. Surviving
    /// common ancestors must score no higher than either descendant, must
    /// not have been tried for this pair, and must leave at least one
    /// divergent component. One is drawn weighted by aggregate score.
    fn find_common_ancestor_pair(
        &mut self,
        state: &GepaState,
        pool: &[usize],
    ) -> GepaResult<Option<MergeTriple>> {
        let parents = state.parents();
        let agg = state.agg_scores();

        for _ in 0..MAX_MERGE_ATTEMPTS {
            let picked = index::sample(&mut self.rng, pool.len(), 2);
            let (mut i, mut j) = (pool[picked.index(0)], pool[picked.index(1)]);
            if j < i {
                std::mem::swap(&mut i, &mut j);
            }

            if lineage::is_ancestor(parents, j, i) || lineage::is_ancestor(parents, i, j) {
                continue;
            }

            let candidates: Vec<usize> = lineage::common_ancestors(parents, i, j)
                .into_iter()
                .filter(|&anc| !self.triples_tried.contains(&(i, j, anc)))
                .filter(|&anc| agg[anc] <= agg[i] && agg[anc] <= agg[j])
                .filter(|&anc| has_divergent_component(state, anc, i, j))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let weights: Vec<f64> = candidates.iter().map(|&a| agg[a].max(0.0)).collect();
            let ancestor = if weights.iter().sum::<f64>() > 0.0 {
                let dist = WeightedIndex::new(&weights).map_err(|e| {
                    GepaError::ContractViolation(format!("invalid ancestor weights: {}", e))
                })?;
                candidates[dist.sample(&mut self.rng)]
            } else {
                candidates[self.rng.gen_range(0..candidates.len())]
            };

            self.triples_tried.push((i, j, ancestor));
            return Ok(Some((i, j, ancestor)));
        }

        Ok(None)
    }

    /// Build the merged candidate and the source of each component.
    fn recombine(
        &mut self,
        state: &GepaState,
        (id1, id2, ancestor): MergeTriple,
    ) -> GepaResult<(Candidate, Vec<usize>)> {
        let anc = state.candidate(ancestor)?;
        let c1 = state.candidate(id1)?;
        let c2 = state.candidate(id2)?;
        let agg = state.agg_scores();

        let mut merged = anc.clone();
        let mut sources = Vec::with_capacity(anc.len());

        for (name, anc_text) in anc {
            let (Some(t1), Some(t2)) = (c1.get(name), c2.get(name)) else {
                return Err(GepaError::ContractViolation(format!(
                    "component '{}' missing from a merge descendant",
                    name
                )));
            };

            let source = if (anc_text == t1 || anc_text == t2) && t1 != t2 {
                // Follow the branch that changed it.
                if anc_text == t1 { id2 } else { id1 }
            } else if anc_text != t1 && anc_text != t2 {
                if agg[id1] > agg[id2] {
                    id1
                } else if agg[id2] > agg[id1] {
                    id2
                } else if self.rng.gen_bool(0.5) {
                    id1
                } else {
                    id2
                }
            } else if t1 == t2 {
                id1
            } else {
                return Err(GepaError::ContractViolation(format!(
                    "unreachable recombination case for component '{}'",
                    name
                )));
            };

            let text = if source == id1 { t1 } else { t2 };
            merged.insert(name.clone(), text.clone());
            sources.push(source);
        }

        Ok((merged, sources))
    }

    /// Stratified validation subsample: ids where `id1` wins, where `id2`
    /// wins, then ties, topped up from unused ids (with replacement only when
    /// the validation set is too small).
    fn select_eval_subsample(&mut self, scores1: &[f64], scores2: &[f64]) -> Vec<usize> {
        let k = self.subsample_size;
        let n = scores1.len().min(scores2.len());

        let p1: Vec<usize> = (0..n).filter(|&i| scores1[i] > scores2[i]).collect();
        let p2: Vec<usize> = (0..n).filter(|&i| scores2[i] > scores1[i]).collect();
        let p3: Vec<usize> = (0..n)
            .filter(|&i| !(scores1[i] > scores2[i]) && !(scores2[i] > scores1[i]))
            .collect();

        let n_each = k.div_ceil(3).max(1);
        let mut selected: Vec<usize> = Vec::with_capacity(k);

        for bucket in [&p1, &p2, &p3] {
            if selected.len() >= k {
                break;
            }
            let take = bucket.len().min(n_each).min(k - selected.len());
            let picks = index::sample(&mut self.rng, bucket.len(), take);
            selected.extend(picks.iter().map(|p| bucket[p]));
        }

        let remaining = k - selected.len();
        if remaining > 0 {
            let used: BTreeSet<usize> = selected.iter().copied().collect();
            let unused: Vec<usize> = (0..n).filter(|i| !used.contains(i)).collect();
            if unused.len() >= remaining {
                let picks = index::sample(&mut self.rng, unused.len(), remaining);
                selected.extend(picks.iter().map(|p| unused[p]));
            } else if n > 0 {
                selected.extend((0..remaining).map(|_| self.rng.gen_range(0..n)));
            }
        }

        selected.truncate(k);
        selected
    }
}

/// A component where the ancestor matches exactly one descendant and the
/// descendants differ.
fn has_divergent_component(state: &GepaState, ancestor: usize, id1: usize, id2: usize) -> bool {
    let candidates = state.candidates();
    let (anc, c1, c2) = (&candidates[ancestor], &candidates[id1], &candidates[id2]);
    anc.iter().any(|(name, anc_text)| match (c1.get(name), c2.get(name)) {
        (Some(t1), Some(t2)) => (anc_text == t1 || anc_text == t2) && t1 != t2,
        _ => false,
    })
}

impl<A: Adapter> ProposeNewCandidate for MergeProposer<'_, A> {
    #[instrument(
        skip_all,
        fields(
            iteration = state.i + 1,
            strategy = "merge",
            parents = tracing::field::Empty,
            ancestor = tracing::field::Empty
        )
    )]
    fn propose(&mut self, state: &mut GepaState) -> GepaResult<Option<CandidateProposal>> {
        if !self.is_due() {
            debug!("merge not due");
            return Ok(None);
        }
        state.current_trace_mut().invoked_merge = Some(true);

        let pool = pareto::find_dominator_programs(state.pareto_front(), state.agg_scores());
        if pool.len() < 2 || state.len() < 3 {
            info!(pool = pool.len(), "not enough candidates to merge");
            return Ok(None);
        }

        let mut found = None;
        for _ in 0..MAX_MERGE_ATTEMPTS {
            let Some(triple) = self.find_common_ancestor_pair(state, &pool)? else {
                continue;
            };
            let (merged, sources) = self.recombine(state, triple)?;

            let descriptor = (triple.0, triple.1, sources);
            if self.merges_performed.contains(&descriptor) {
                debug!(?triple, "merge already performed");
                continue;
            }
            self.merges_performed.push(descriptor);
            found = Some((triple, merged));
            break;
        }

        let Some(((id1, id2, ancestor), merged)) = found else {
            info!("no mergeable pair found");
            return Ok(None);
        };

        let span = Span::current();
        span.record("parents", tracing::field::debug(&[id1, id2]));
        span.record("ancestor", ancestor);

        {
            let trace = state.current_trace_mut();
            trace.merged = Some(true);
            trace.merged_entities = Some((id1, id2, ancestor));
        }

        let scores1 = state.val_subscores()[id1].clone();
        let scores2 = state.val_subscores()[id2].clone();
        let subsample_ids = self.select_eval_subsample(&scores1, &scores2);
        let examples = adapter::select_examples(self.valset, &subsample_ids)?;

        let eval = adapter::evaluate_checked(self.adapter, &examples, &merged, false)?;
        state.total_num_evals += subsample_ids.len();

        let before1: Vec<f64> = subsample_ids.iter().map(|&i| scores1[i]).collect();
        let before2: Vec<f64> = subsample_ids.iter().map(|&i| scores2[i]).collect();

        info!(
            id1,
            id2,
            ancestor,
            after = eval.total(),
            "evaluated merge"
        );

        let mut metadata = serde_json::Map::new();
        metadata.insert("ancestor".to_string(), ancestor.into());
        metadata.insert("iteration".to_string(), (state.i + 1).into());

        Ok(Some(CandidateProposal {
            candidate: merged,
            parent_program_ids: vec![id1, id2],
            subsample_indices: subsample_ids,
            subsample_scores_before: vec![before1, before2],
            subsample_scores_after: eval.scores,
            tag: ProposalTag::Merge,
            metadata,
        }))
    }
}
