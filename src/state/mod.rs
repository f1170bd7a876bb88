//! The population under optimization.
//!
//! `GepaState` is the single mutable aggregate shared by the proposers and the
//! acceptance loop. The parallel per-candidate lists (candidates, aggregate
//! scores, validation subscores, parents, discovery costs) are private and only
//! grow through [`GepaState::add_program`], which keeps them in sync and keeps
//! the per-example Pareto front current.
//!
//! Counters, the round-robin pointers and the iteration trace are plain fields:
//! proposers update them directly.

pub mod lineage;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GepaError, GepaResult};
use crate::pareto::{self, ParetoFront};
use crate::types::Candidate;

/// File name used for checkpoints inside a run directory.
pub const STATE_FILE: &str = "gepa_state.json";

/// Diagnostic record for one iteration. Proposers fill in what they did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceRecord {
    pub i: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_program_candidate: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsample_ids: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsample_scores: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_subsample_scores: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoked_merge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<bool>,
    /// `(id1, id2, ancestor)` of the merge attempted this iteration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_entities: Option<(usize, usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_program_idx: Option<usize>,
}

impl TraceRecord {
    pub fn new(i: usize) -> Self {
        Self {
            i,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GepaState {
    program_candidates: Vec<Candidate>,
    per_program_tracked_scores: Vec<f64>,
    prog_candidate_val_subscores: Vec<Vec<f64>>,
    parent_program_for_candidate: Vec<Vec<usize>>,
    num_metric_calls_by_discovery: Vec<usize>,

    /// Best score seen so far on each validation example.
    pareto_front_valset: Vec<f64>,

    /// Candidates attaining `pareto_front_valset[example]`.
    program_at_pareto_front_valset: ParetoFront,

    /// Component names shared by every candidate, in candidate order.
    pub list_of_named_predictors: Vec<String>,

    /// Round-robin pointer into `list_of_named_predictors`, per candidate.
    pub named_predictor_id_to_update_next_for_program_candidate: Vec<usize>,

    pub full_program_trace: Vec<TraceRecord>,

    /// Evaluator calls so far, counted in examples.
    pub total_num_evals: usize,

    /// Full validation-set evaluations so far.
    pub num_full_ds_evals: usize,

    /// Iterations completed. Proposers read it; only the loop increments it.
    pub i: usize,
}

impl GepaState {
    /// Build the initial population from the seed candidate and its scores on
    /// the full validation set.
    pub fn new(
        seed_candidate: Candidate,
        seed_val_subscores: Vec<f64>,
        num_evals: usize,
    ) -> GepaResult<Self> {
        if seed_candidate.is_empty() {
            return Err(GepaError::Config(
                "seed candidate has no components".to_string(),
            ));
        }
        if seed_val_subscores.is_empty() {
            return Err(GepaError::Config("validation set is empty".to_string()));
        }

        let aggregate = mean(&seed_val_subscores);
        let front = vec![BTreeSet::from([0]); seed_val_subscores.len()];

        Ok(Self {
            list_of_named_predictors: seed_candidate.keys().cloned().collect(),
            program_candidates: vec![seed_candidate],
            per_program_tracked_scores: vec![aggregate],
            pareto_front_valset: seed_val_subscores.clone(),
            prog_candidate_val_subscores: vec![seed_val_subscores],
            program_at_pareto_front_valset: front,
            parent_program_for_candidate: vec![Vec::new()],
            named_predictor_id_to_update_next_for_program_candidate: vec![0],
            num_metric_calls_by_discovery: vec![0],
            full_program_trace: Vec::new(),
            total_num_evals: num_evals,
            num_full_ds_evals: 1,
            i: 0,
        })
    }

    /// Append an accepted candidate with its full validation subscores.
    ///
    /// Parents must already exist, the candidate must define exactly the
    /// shared components, and the subscores must cover the validation set.
    /// Returns the new candidate's id.
    pub fn add_program(
        &mut self,
        candidate: Candidate,
        parents: &[usize],
        val_subscores: Vec<f64>,
        metric_calls_at_discovery: usize,
    ) -> GepaResult<usize> {
        let new_id = self.program_candidates.len();

        if let Some(&bad) = parents.iter().find(|&&p| p >= new_id) {
            return Err(GepaError::ContractViolation(format!(
                "parent {} does not precede new candidate {}",
                bad, new_id
            )));
        }
        if val_subscores.len() != self.pareto_front_valset.len() {
            return Err(GepaError::ContractViolation(format!(
                "expected {} validation scores, got {}",
                self.pareto_front_valset.len(),
                val_subscores.len()
            )));
        }
        if candidate.len() != self.list_of_named_predictors.len()
            || !self
                .list_of_named_predictors
                .iter()
                .all(|name| candidate.contains_key(name))
        {
            return Err(GepaError::ContractViolation(format!(
                "candidate components {:?} do not match {:?}",
                candidate.keys().collect::<Vec<_>>(),
                self.list_of_named_predictors
            )));
        }

        let pointer = parents
            .iter()
            .map(|&p| self.named_predictor_id_to_update_next_for_program_candidate[p])
            .max()
            .unwrap_or(0);

        for (example, &score) in val_subscores.iter().enumerate() {
            let best = self.pareto_front_valset[example];
            if score > best {
                self.pareto_front_valset[example] = score;
                self.program_at_pareto_front_valset[example] = BTreeSet::from([new_id]);
            } else if score == best {
                self.program_at_pareto_front_valset[example].insert(new_id);
            }
        }

        self.program_candidates.push(candidate);
        self.per_program_tracked_scores.push(mean(&val_subscores));
        self.prog_candidate_val_subscores.push(val_subscores);
        self.parent_program_for_candidate.push(parents.to_vec());
        self.named_predictor_id_to_update_next_for_program_candidate
            .push(pointer);
        self.num_metric_calls_by_discovery
            .push(metric_calls_at_discovery);

        Ok(new_id)
    }

    pub fn len(&self) -> usize {
        self.program_candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program_candidates.is_empty()
    }

    pub fn candidate(&self, id: usize) -> GepaResult<&Candidate> {
        self.program_candidates.get(id).ok_or_else(|| {
            GepaError::ContractViolation(format!("no candidate with id {}", id))
        })
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.program_candidates
    }

    /// Mean validation score per candidate.
    pub fn agg_scores(&self) -> &[f64] {
        &self.per_program_tracked_scores
    }

    /// Per-example validation scores per candidate.
    pub fn val_subscores(&self) -> &[Vec<f64>] {
        &self.prog_candidate_val_subscores
    }

    pub fn parents(&self) -> &[Vec<usize>] {
        &self.parent_program_for_candidate
    }

    pub fn pareto_front(&self) -> &ParetoFront {
        &self.program_at_pareto_front_valset
    }

    pub fn pareto_front_scores(&self) -> &[f64] {
        &self.pareto_front_valset
    }

    pub fn metric_calls_by_discovery(&self) -> &[usize] {
        &self.num_metric_calls_by_discovery
    }

    pub fn valset_len(&self) -> usize {
        self.pareto_front_valset.len()
    }

    /// Id of the best candidate by aggregate score (first on ties).
    pub fn best_idx(&self) -> usize {
        pareto::idxmax(&self.per_program_tracked_scores).unwrap_or(0)
    }

    pub fn best_score(&self) -> f64 {
        self.per_program_tracked_scores
            .get(self.best_idx())
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Open a trace record for the current iteration.
    pub fn push_trace(&mut self) {
        self.full_program_trace.push(TraceRecord::new(self.i));
    }

    /// Start the record for the current iteration. A record left open for the
    /// same iteration by an interrupted attempt is replaced, not duplicated.
    pub fn begin_trace(&mut self) {
        match self.full_program_trace.last_mut() {
            Some(last) if last.i == self.i => *last = TraceRecord::new(self.i),
            _ => self.push_trace(),
        }
    }

    /// The record for the current iteration, opened on demand.
    pub fn current_trace_mut(&mut self) -> &mut TraceRecord {
        if self.full_program_trace.last().map(|t| t.i) != Some(self.i) {
            self.push_trace();
        }
        let last = self.full_program_trace.len() - 1;
        &mut self.full_program_trace[last]
    }

    /// Check every structural invariant. Used after loading a checkpoint.
    pub fn check_consistency(&self) -> GepaResult<()> {
        let n = self.program_candidates.len();
        let lengths = [
            self.per_program_tracked_scores.len(),
            self.prog_candidate_val_subscores.len(),
            self.parent_program_for_candidate.len(),
            self.named_predictor_id_to_update_next_for_program_candidate
                .len(),
            self.num_metric_calls_by_discovery.len(),
        ];
        if n == 0 || lengths.iter().any(|&len| len != n) {
            return Err(GepaError::ContractViolation(format!(
                "parallel lists out of sync: {} candidates, lengths {:?}",
                n, lengths
            )));
        }

        let valset = self.pareto_front_valset.len();
        if self.program_at_pareto_front_valset.len() != valset
            || self
                .prog_candidate_val_subscores
                .iter()
                .any(|s| s.len() != valset)
        {
            return Err(GepaError::ContractViolation(
                "validation subscores do not match the front".to_string(),
            ));
        }

        for (id, parents) in self.parent_program_for_candidate.iter().enumerate() {
            if parents.iter().any(|&p| p >= id) {
                return Err(GepaError::ContractViolation(format!(
                    "candidate {} has a parent that does not precede it",
                    id
                )));
            }
        }

        if self
            .program_at_pareto_front_valset
            .iter()
            .flatten()
            .any(|&id| id >= n)
        {
            return Err(GepaError::ContractViolation(
                "pareto front references an unknown candidate".to_string(),
            ));
        }

        let expected_front = pareto::front_for(&self.prog_candidate_val_subscores);
        if expected_front != self.program_at_pareto_front_valset {
            return Err(GepaError::ContractViolation(
                "stored pareto front disagrees with the validation subscores".to_string(),
            ));
        }
        let best_per_example = (0..valset).map(|example| {
            self.prog_candidate_val_subscores
                .iter()
                .map(|scores| scores[example])
                .fold(f64::NEG_INFINITY, f64::max)
        });
        if !best_per_example.eq(self.pareto_front_valset.iter().copied()) {
            return Err(GepaError::ContractViolation(
                "stored best scores disagree with the validation subscores".to_string(),
            ));
        }

        Ok(())
    }

    pub fn state_path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    /// Write the state to `<dir>/gepa_state.json`.
    pub fn save(&self, dir: &Path) -> GepaResult<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::state_path(dir), json)?;
        Ok(())
    }

    /// Load a checkpoint from `<dir>/gepa_state.json`, if one exists.
    pub fn load(dir: &Path) -> GepaResult<Option<Self>> {
        let path = Self::state_path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state: Self = serde_json::from_str(&content)?;
        state.check_consistency()?;
        Ok(Some(state))
    }
}

fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cand(qa: &str, sum: &str) -> Candidate {
        let mut c = Candidate::new();
        c.insert("qa".into(), qa.into());
        c.insert("sum".into(), sum.into());
        c
    }

    fn seeded() -> GepaState {
        GepaState::new(cand("a", "b"), vec![0.5, 0.0, 1.0], 3).unwrap()
    }

    #[test]
    fn test_seed_state() {
        let state = seeded();
        assert_eq!(state.len(), 1);
        assert_eq!(state.list_of_named_predictors, vec!["qa", "sum"]);
        assert!((state.agg_scores()[0] - 0.5).abs() < 1e-12);
        assert_eq!(state.parents()[0], Vec::<usize>::new());
        assert_eq!(state.total_num_evals, 3);
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_add_program_updates_front() {
        let mut state = seeded();
        let id = state
            .add_program(cand("a2", "b"), &[0], vec![0.5, 1.0, 0.0], 10)
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(state.pareto_front()[0], BTreeSet::from([0, 1]));
        assert_eq!(state.pareto_front()[1], BTreeSet::from([1]));
        assert_eq!(state.pareto_front()[2], BTreeSet::from([0]));
        assert_eq!(state.pareto_front_scores(), &[0.5, 1.0, 1.0]);
        assert_eq!(state.metric_calls_by_discovery(), &[0, 10]);
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_front_matches_recomputation() {
        let mut state = seeded();
        state.add_program(cand("x", "b"), &[0], vec![0.9, 0.0, 0.2], 1).unwrap();
        state.add_program(cand("y", "b"), &[1], vec![0.9, 0.3, 1.0], 2).unwrap();
        assert_eq!(state.pareto_front(), &pareto::front_for(state.val_subscores()));
    }

    #[test]
    fn test_add_program_rejects_bad_input() {
        let mut state = seeded();
        let err = state.add_program(cand("x", "y"), &[1], vec![0.0; 3], 0);
        assert!(matches!(err, Err(GepaError::ContractViolation(_))));

        let err = state.add_program(cand("x", "y"), &[0], vec![0.0; 2], 0);
        assert!(matches!(err, Err(GepaError::ContractViolation(_))));

        let mut extra = cand("x", "y");
        extra.insert("other".into(), "z".into());
        let err = state.add_program(extra, &[0], vec![0.0; 3], 0);
        assert!(matches!(err, Err(GepaError::ContractViolation(_))));

        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_pointer_inherits_max_of_parents() {
        let mut state = seeded();
        state.add_program(cand("x", "b"), &[0], vec![0.0; 3], 0).unwrap();
        state.named_predictor_id_to_update_next_for_program_candidate[1] = 1;
        let id = state.add_program(cand("x", "c"), &[0, 1], vec![0.0; 3], 0).unwrap();
        assert_eq!(state.named_predictor_id_to_update_next_for_program_candidate[id], 1);
    }

    #[test]
    fn test_current_trace_opens_once_per_iteration() {
        let mut state = seeded();
        state.current_trace_mut().selected_program_candidate = Some(0);
        state.current_trace_mut().subsample_ids = Some(vec![1, 2]);
        state.i = 1;
        state.current_trace_mut().invoked_merge = Some(true);
        assert_eq!(state.full_program_trace.len(), 2);
        assert_eq!(state.full_program_trace[0].subsample_ids, Some(vec![1, 2]));
        assert_eq!(state.full_program_trace[1].i, 1);
    }

    #[test]
    fn test_begin_trace_replaces_interrupted_record() {
        let mut state = seeded();
        state.begin_trace();
        state.current_trace_mut().subsample_ids = Some(vec![0, 1]);

        // Same iteration started again: one fresh record, not two.
        state.begin_trace();
        assert_eq!(state.full_program_trace, vec![TraceRecord::new(0)]);

        state.i = 1;
        state.begin_trace();
        let iterations: Vec<usize> = state.full_program_trace.iter().map(|t| t.i).collect();
        assert_eq!(iterations, vec![0, 1]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = seeded();
        state.add_program(cand("x", "b"), &[0], vec![1.0, 1.0, 1.0], 6).unwrap();
        state.push_trace();
        state.save(dir.path()).unwrap();

        let loaded = GepaState::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.candidates()[1]["qa"], "x");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GepaState::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_rejects_inconsistent_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = seeded();
        state.per_program_tracked_scores.push(0.1);
        state.save(dir.path()).unwrap();
        assert!(GepaState::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_rejects_stale_front() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = seeded();
        state.add_program(cand("x", "b"), &[0], vec![1.0, 1.0, 1.0], 6).unwrap();
        state.program_at_pareto_front_valset[0] = BTreeSet::from([0]);
        state.save(dir.path()).unwrap();
        assert!(matches!(
            GepaState::load(dir.path()),
            Err(GepaError::ContractViolation(_))
        ));

        let mut state = seeded();
        state.pareto_front_valset[1] = 0.7;
        state.save(dir.path()).unwrap();
        assert!(matches!(
            GepaState::load(dir.path()),
            Err(GepaError::ContractViolation(_))
        ));
    }

    proptest! {
        #[test]
        fn test_lineage_stays_acyclic(
            picks in prop::collection::vec((any::<u16>(), any::<u16>(), any::<bool>()), 1..40)
        ) {
            let mut state = seeded();
            for (a, b, two) in picks {
                let n = state.len();
                let mut parents = vec![a as usize % n];
                if two {
                    let second = b as usize % n;
                    if second != parents[0] {
                        parents.push(second);
                    }
                }
                state.add_program(cand("x", "y"), &parents, vec![0.1; 3], 0).unwrap();
            }

            prop_assert_eq!(state.len(), state.agg_scores().len());
            prop_assert_eq!(state.len(), state.val_subscores().len());
            for id in 0..state.len() {
                prop_assert!(!lineage::ancestors(state.parents(), id).contains(&id));
            }
        }
    }
}
