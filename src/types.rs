//! Core value types shared by strategies, proposers and the engine.
//!
//! A candidate is an ordered mapping from component name to instruction text.
//! Candidates are identified only by their index in the population and are
//! never mutated in place: every proposal builds a structural copy.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A program candidate: component name -> instruction text, in component order.
pub type Candidate = IndexMap<String, String>;

/// New instruction text per component, as produced by a proposer.
pub type ComponentTexts = IndexMap<String, String>;

/// Per-component example records (input, output, feedback, ...) used to
/// drive reflection. Records are arbitrary nested JSON mappings.
pub type ReflectiveDataset = IndexMap<String, Vec<Value>>;

/// Which proposer produced a [`CandidateProposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalTag {
    ReflectiveMutation,
    Merge,
}

impl ProposalTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalTag::ReflectiveMutation => "reflective_mutation",
            ProposalTag::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ProposalTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed new candidate, handed from a proposer to the acceptance loop.
///
/// Consumed once: the loop decides whether to evaluate it on the full
/// validation set and append it to the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProposal {
    /// The proposed program.
    pub candidate: Candidate,

    /// One parent for a mutation, two for a merge.
    pub parent_program_ids: Vec<usize>,

    /// Example indices the before/after scores were measured on
    /// (train set for mutations, validation set for merges).
    pub subsample_indices: Vec<usize>,

    /// Per-example scores of each parent on the subsample, parallel to
    /// `parent_program_ids`.
    pub subsample_scores_before: Vec<Vec<f64>>,

    /// Per-example scores of the proposed candidate on the same subsample.
    pub subsample_scores_after: Vec<f64>,

    pub tag: ProposalTag,

    /// Free-form annotations (`iteration`, `ancestor`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CandidateProposal {
    /// Sum of the proposed candidate's subsample scores.
    pub fn score_after(&self) -> f64 {
        self.subsample_scores_after.iter().sum()
    }

    /// Sum of each parent's subsample scores, in parent order.
    pub fn parent_score_sums(&self) -> Vec<f64> {
        self.subsample_scores_before
            .iter()
            .map(|scores| scores.iter().sum())
            .collect()
    }

    /// Best parent subsample sum (`-inf` when there are no parents).
    pub fn best_parent_score(&self) -> f64 {
        self.parent_score_sums()
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Merge ancestor recorded in the metadata, if any.
    pub fn ancestor(&self) -> Option<usize> {
        self.metadata
            .get("ancestor")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    /// Iteration number recorded in the metadata, if any.
    pub fn iteration(&self) -> Option<usize> {
        self.metadata
            .get("iteration")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }
}

/// Result of running a candidate on a batch of examples.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationBatch<T> {
    /// One score per example, in example order.
    pub scores: Vec<f64>,

    /// Execution traces, only when requested and materializable.
    pub trajectories: Option<Vec<T>>,
}

impl<T> EvaluationBatch<T> {
    pub fn new(scores: Vec<f64>, trajectories: Option<Vec<T>>) -> Self {
        Self { scores, trajectories }
    }

    /// Scores without traces.
    pub fn scores_only(scores: Vec<f64>) -> Self {
        Self {
            scores,
            trajectories: None,
        }
    }

    /// True when at least one trajectory was captured.
    pub fn has_trajectories(&self) -> bool {
        self.trajectories.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn total(&self) -> f64 {
        self.scores.iter().sum()
    }
}
