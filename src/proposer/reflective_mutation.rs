//! Reflective mutation: rewrite one candidate's instructions from feedback.
//!
//! One proposal runs through:
//!
//! ```text
//! select candidate -> sample minibatch -> evaluate with traces
//!     -> (abort) | select components -> reflective dataset -> new texts
//!     -> evaluate new candidate on the same minibatch -> proposal
//! ```
//!
//! Missing traces, an already-perfect minibatch and any failure while
//! reflecting are soft aborts. A proposed component the candidate does not
//! have is a contract violation.

use tracing::{debug, info, instrument, warn};

use crate::adapter::{self, Adapter, ReflectionOracle};
use crate::error::{GepaError, GepaResult};
use crate::state::GepaState;
use crate::strategies::batch_sampler::BatchSampler;
use crate::strategies::candidate_selector::CandidateSelector;
use crate::strategies::component_selector::ComponentSelector;
use crate::strategies::instruction_proposal;
use crate::types::{Candidate, CandidateProposal, ComponentTexts, EvaluationBatch, ProposalTag};

use super::ProposeNewCandidate;

pub struct ReflectiveMutationProposer<'a, A: Adapter> {
    adapter: &'a A,
    trainset: &'a [A::Example],
    candidate_selector: Box<dyn CandidateSelector + 'a>,
    component_selector: Box<dyn ComponentSelector<A::Trajectory> + 'a>,
    batch_sampler: Box<dyn BatchSampler + 'a>,
    oracle: Option<&'a dyn ReflectionOracle>,
    skip_perfect_score: bool,
    perfect_score: f64,
}

impl<'a, A: Adapter> ReflectiveMutationProposer<'a, A> {
    /// Fails when the adapter cannot propose texts and no oracle is given.
    pub fn new(
        adapter: &'a A,
        trainset: &'a [A::Example],
        candidate_selector: Box<dyn CandidateSelector + 'a>,
        component_selector: Box<dyn ComponentSelector<A::Trajectory> + 'a>,
        batch_sampler: Box<dyn BatchSampler + 'a>,
        oracle: Option<&'a dyn ReflectionOracle>,
    ) -> GepaResult<Self> {
        if oracle.is_none() && !adapter.supports_text_proposal() {
            return Err(GepaError::Config(
                "a reflection oracle is required when the adapter cannot propose texts"
                    .to_string(),
            ));
        }
        if trainset.is_empty() {
            return Err(GepaError::Config("training set is empty".to_string()));
        }
        Ok(Self {
            adapter,
            trainset,
            candidate_selector,
            component_selector,
            batch_sampler,
            oracle,
            skip_perfect_score: true,
            perfect_score: 1.0,
        })
    }

    /// Skip minibatches where every score already reaches `perfect_score`.
    pub fn with_perfect_score(mut self, skip: bool, perfect_score: f64) -> Self {
        self.skip_perfect_score = skip;
        self.perfect_score = perfect_score;
        self
    }

    fn propose_texts(
        &self,
        candidate: &Candidate,
        eval: &EvaluationBatch<A::Trajectory>,
        components: &[String],
    ) -> GepaResult<ComponentTexts> {
        let dataset = self
            .adapter
            .make_reflective_dataset(candidate, eval, components)?;

        if self.adapter.supports_text_proposal() {
            return self.adapter.propose_new_texts(candidate, &dataset, components);
        }

        let oracle = self.oracle.ok_or_else(|| {
            GepaError::Reflection("no reflection oracle configured".to_string())
        })?;

        let mut texts = ComponentTexts::new();
        for name in components {
            let current = candidate.get(name).ok_or_else(|| {
                GepaError::Reflection(format!("component '{}' not in candidate", name))
            })?;
            let samples = dataset.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let text = instruction_proposal::propose_instruction(oracle, current, samples)?;
            texts.insert(name.clone(), text);
        }
        Ok(texts)
    }
}

impl<A: Adapter> ProposeNewCandidate for ReflectiveMutationProposer<'_, A> {
    #[instrument(
        skip_all,
        fields(
            iteration = state.i + 1,
            strategy = "reflective_mutation",
            candidate = tracing::field::Empty
        )
    )]
    fn propose(&mut self, state: &mut GepaState) -> GepaResult<Option<CandidateProposal>> {
        let iteration = state.i + 1;

        let idx = self.candidate_selector.select_candidate_idx(state)?;
        let current = state.candidate(idx)?.clone();
        state.current_trace_mut().selected_program_candidate = Some(idx);
        tracing::Span::current().record("candidate", idx);
        info!(
            selector = self.candidate_selector.name(),
            score = state.agg_scores()[idx],
            "selected program {}",
            idx
        );

        let subsample_ids = self
            .batch_sampler
            .next_minibatch_indices(self.trainset.len(), iteration - 1)?;
        let minibatch = adapter::select_examples(self.trainset, &subsample_ids)?;

        let eval_curr = adapter::evaluate_checked(self.adapter, &minibatch, &current, true)?;
        state.total_num_evals += subsample_ids.len();
        {
            let trace = state.current_trace_mut();
            trace.subsample_ids = Some(subsample_ids.clone());
            trace.subsample_scores = Some(eval_curr.scores.clone());
        }

        if !eval_curr.has_trajectories() {
            info!("no trajectories captured, skipping");
            return Ok(None);
        }

        if self.skip_perfect_score && eval_curr.scores.iter().all(|&s| s >= self.perfect_score) {
            info!("all minibatch scores are perfect, skipping");
            return Ok(None);
        }

        let components = self
            .component_selector
            .select_components(state, &eval_curr, idx)?;

        let texts = match self.propose_texts(&current, &eval_curr, &components) {
            Ok(texts) => texts,
            Err(e) => {
                warn!(components = ?components, error = %e, "reflection failed, skipping");
                return Ok(None);
            }
        };

        let mut new_candidate = current.clone();
        for (name, text) in texts {
            let Some(slot) = new_candidate.get_mut(&name) else {
                return Err(GepaError::ContractViolation(format!(
                    "proposed component '{}' is not part of program {}",
                    name, idx
                )));
            };
            debug!(component = %name, "proposed instruction:\n{}", text);
            *slot = text;
        }

        let eval_new = adapter::evaluate_checked(self.adapter, &minibatch, &new_candidate, false)?;
        state.total_num_evals += subsample_ids.len();
        state.current_trace_mut().new_subsample_scores = Some(eval_new.scores.clone());

        info!(
            before = eval_curr.total(),
            after = eval_new.total(),
            "evaluated mutation of {}",
            idx
        );

        let mut metadata = serde_json::Map::new();
        metadata.insert("iteration".to_string(), iteration.into());

        Ok(Some(CandidateProposal {
            candidate: new_candidate,
            parent_program_ids: vec![idx],
            subsample_indices: subsample_ids,
            subsample_scores_before: vec![eval_curr.scores],
            subsample_scores_after: eval_new.scores,
            tag: ProposalTag::ReflectiveMutation,
            metadata,
        }))
    }
}
