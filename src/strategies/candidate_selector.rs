//! Strategies for choosing which candidate to improve next.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{Span, debug, instrument};

use crate::config::CandidateSelection;
use crate::error::{GepaError, GepaResult};
use crate::pareto;
use crate::state::GepaState;

/// Given the population, return the id of a candidate to improve.
pub trait CandidateSelector {
    fn name(&self) -> &'static str;

    fn select_candidate_idx(&mut self, state: &GepaState) -> GepaResult<usize>;
}

/// Build the selector named in the config.
pub fn candidate_selector_for(
    strategy: CandidateSelection,
    epsilon: f64,
    seed: u64,
) -> Box<dyn CandidateSelector> {
    match strategy {
        CandidateSelection::Pareto => Box::new(ParetoCandidateSelector::new(seed)),
        CandidateSelection::CurrentBest => Box::new(CurrentBestCandidateSelector),
        CandidateSelection::EpsilonGreedy => {
            Box::new(EpsilonGreedyCandidateSelector::new(epsilon, seed))
        }
    }
}

fn check_tracked_scores(state: &GepaState) -> GepaResult<()> {
    if state.agg_scores().len() != state.len() || state.is_empty() {
        return Err(GepaError::ContractViolation(format!(
            "{} tracked scores for {} candidates",
            state.agg_scores().len(),
            state.len()
        )));
    }
    Ok(())
}

fn best_candidate(state: &GepaState) -> GepaResult<usize> {
    pareto::idxmax(state.agg_scores())
        .ok_or_else(|| GepaError::ContractViolation("no candidates to select".to_string()))
}

/// Pareto-weighted sampling over the per-example fronts.
#[derive(Debug)]
pub struct ParetoCandidateSelector {
    rng: StdRng,
}

impl ParetoCandidateSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl CandidateSelector for ParetoCandidateSelector {
    fn name(&self) -> &'static str {
        "pareto"
    }

    #[instrument(
        skip_all,
        fields(
            iteration = state.i + 1,
            strategy = self.name(),
            candidate = tracing::field::Empty
        )
    )]
    fn select_candidate_idx(&mut self, state: &GepaState) -> GepaResult<usize> {
        check_tracked_scores(state)?;
        let idx = pareto::select_program_candidate_from_pareto_front(
            state.pareto_front(),
            state.agg_scores(),
            &mut self.rng,
        )?;
        Span::current().record("candidate", idx);
        Ok(idx)
    }
}

#[derive(Debug, Default)]
pub struct CurrentBestCandidateSelector;

impl CandidateSelector for CurrentBestCandidateSelector {
    fn name(&self) -> &'static str {
        "current-best"
    }

    #[instrument(
        skip_all,
        fields(
            iteration = state.i + 1,
            strategy = self.name(),
            candidate = tracing::field::Empty
        )
    )]
    fn select_candidate_idx(&mut self, state: &GepaState) -> GepaResult<usize> {
        check_tracked_scores(state)?;
        let idx = best_candidate(state)?;
        Span::current().record("candidate", idx);
        Ok(idx)
    }
}

/// Mostly the current best, occasionally a uniformly random candidate.
#[derive(Debug)]
pub struct EpsilonGreedyCandidateSelector {
    epsilon: f64,
    rng: StdRng,
}

impl EpsilonGreedyCandidateSelector {
    pub fn new(epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl CandidateSelector for EpsilonGreedyCandidateSelector {
    fn name(&self) -> &'static str {
        "epsilon-greedy"
    }

    #[instrument(
        skip_all,
        fields(
            iteration = state.i + 1,
            strategy = self.name(),
            candidate = tracing::field::Empty
        )
    )]
    fn select_candidate_idx(&mut self, state: &GepaState) -> GepaResult<usize> {
        check_tracked_scores(state)?;
        let idx = if self.rng.r#gen::<f64>() < self.epsilon {
            let idx = self.rng.gen_range(0..state.len());
            debug!("exploring random candidate");
            idx
        } else {
            best_candidate(state)?
        };
        Span::current().record("candidate", idx);
        Ok(idx)
    }
}
