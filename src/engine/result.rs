//! Summary of a finished optimization run.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::candidate;
use crate::state::{GepaState, lineage};
use crate::types::Candidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub candidates: Vec<Candidate>,
    pub parents: Vec<Vec<usize>>,
    /// Mean validation score per candidate.
    pub val_aggregate_scores: Vec<f64>,
    pub val_subscores: Vec<Vec<f64>>,
    /// Per validation example, the candidates tied for the best score.
    pub per_val_instance_best_candidates: Vec<BTreeSet<usize>>,
    /// Metric calls spent when each candidate was discovered.
    pub discovery_eval_counts: Vec<usize>,
    pub best_idx: usize,
    pub iterations: usize,
    pub total_metric_calls: usize,
    pub num_full_val_evals: usize,
    pub seed: u64,
    pub run_dir: Option<PathBuf>,
}

impl OptimizationResult {
    pub fn from_state(state: &GepaState, seed: u64, run_dir: Option<PathBuf>) -> Self {
        Self {
            candidates: state.candidates().to_vec(),
            parents: state.parents().to_vec(),
            val_aggregate_scores: state.agg_scores().to_vec(),
            val_subscores: state.val_subscores().to_vec(),
            per_val_instance_best_candidates: state.pareto_front().clone(),
            discovery_eval_counts: state.metric_calls_by_discovery().to_vec(),
            best_idx: state.best_idx(),
            iterations: state.i,
            total_metric_calls: state.total_num_evals,
            num_full_val_evals: state.num_full_ds_evals,
            seed,
            run_dir,
        }
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn best_candidate(&self) -> &Candidate {
        &self.candidates[self.best_idx]
    }

    pub fn best_score(&self) -> f64 {
        self.val_aggregate_scores[self.best_idx]
    }

    /// Ancestors of `idx`, oldest first.
    pub fn lineage(&self, idx: usize) -> Vec<usize> {
        lineage::ancestors(&self.parents, idx).into_iter().collect()
    }

    /// Components of the best candidate that differ from the seed.
    pub fn changes_from_seed(&self) -> Vec<candidate::ComponentDiff> {
        match self.candidates.first() {
            Some(seed) => candidate::diff(seed, self.best_candidate()),
            None => Vec::new(),
        }
    }
}
