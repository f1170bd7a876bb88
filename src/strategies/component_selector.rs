//! Strategies for choosing which components of a candidate to rewrite.

use tracing::{debug, instrument};

use crate::config::ComponentSelection;
use crate::error::{GepaError, GepaResult};
use crate::state::GepaState;
use crate::types::EvaluationBatch;

/// Choose the components a mutation rewrites.
///
/// Selectors see the minibatch evaluation of the chosen candidate, including
/// its trajectories, so a selector can target the component that failed.
pub trait ComponentSelector<T> {
    fn name(&self) -> &'static str;

    fn select_components(
        &mut self,
        state: &mut GepaState,
        batch: &EvaluationBatch<T>,
        candidate_idx: usize,
    ) -> GepaResult<Vec<String>>;
}

pub fn component_selector_for<T>(strategy: ComponentSelection) -> Box<dyn ComponentSelector<T>> {
    match strategy {
        ComponentSelection::RoundRobin => Box::new(RoundRobinComponentSelector),
        ComponentSelection::All => Box::new(AllComponentSelector),
    }
}

/// One component per call, cycling through a per-candidate pointer.
#[derive(Debug, Default)]
pub struct RoundRobinComponentSelector;

impl<T> ComponentSelector<T> for RoundRobinComponentSelector {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    #[instrument(
        skip_all,
        fields(iteration = state.i + 1, candidate = candidate_idx, strategy = "round-robin")
    )]
    fn select_components(
        &mut self,
        state: &mut GepaState,
        _batch: &EvaluationBatch<T>,
        candidate_idx: usize,
    ) -> GepaResult<Vec<String>> {
        let n = state.list_of_named_predictors.len();
        if n == 0 {
            return Err(GepaError::ContractViolation(
                "candidate has no components".to_string(),
            ));
        }
        let pointers = &mut state.named_predictor_id_to_update_next_for_program_candidate;
        let Some(pointer) = pointers.get_mut(candidate_idx) else {
            return Err(GepaError::ContractViolation(format!(
                "no component pointer for candidate {}",
                candidate_idx
            )));
        };

        let pid = *pointer % n;
        *pointer = (pid + 1) % n;
        let component = state.list_of_named_predictors[pid].clone();
        debug!(component = %component, "selected component");
        Ok(vec![component])
    }
}

/// Every component on every call.
#[derive(Debug, Default)]
pub struct AllComponentSelector;

impl<T> ComponentSelector<T> for AllComponentSelector {
    fn name(&self) -> &'static str {
        "all"
    }

    #[instrument(
        skip_all,
        fields(iteration = state.i + 1, candidate = candidate_idx, strategy = "all")
    )]
    fn select_components(
        &mut self,
        state: &mut GepaState,
        _batch: &EvaluationBatch<T>,
        candidate_idx: usize,
    ) -> GepaResult<Vec<String>> {
        debug!(candidate = candidate_idx, "selected every component");
        Ok(state.list_of_named_predictors.clone())
    }
}
