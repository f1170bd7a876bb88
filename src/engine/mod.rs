//! The optimization loop: propose, test on a subsample, accept or reject.
//!
//! Each iteration first tries a scheduled merge, then a reflective mutation.
//! A mutation is accepted when its minibatch sum strictly improves on its
//! parent's; a merge when its subsample sum is at least the best parent's.
//! Accepted candidates are scored on the full validation set and appended
//! to the population.
//!
//! Contract violations always end the run. Other iteration errors end it
//! only when `raise-on-exception` is set.

pub mod result;
pub mod stop;

use std::path::Path;

use tracing::{error, info, info_span, warn};

use crate::adapter::{self, Adapter, ReflectionOracle};
use crate::config::{self, EngineConfig};
use crate::error::{GepaError, GepaResult};
use crate::proposer::{MergeProposer, ProposeNewCandidate, ReflectiveMutationProposer};
use crate::state::GepaState;
use crate::strategies::batch_sampler::EpochShuffledBatchSampler;
use crate::strategies::candidate_selector::candidate_selector_for;
use crate::strategies::component_selector::component_selector_for;
use crate::types::{Candidate, CandidateProposal, ProposalTag};

pub use result::OptimizationResult;
pub use stop::{AnyStop, StopCondition};

pub struct GepaEngine<'a, A: Adapter> {
    adapter: &'a A,
    trainset: &'a [A::Example],
    valset: &'a [A::Example],
    oracle: Option<&'a dyn ReflectionOracle>,
    config: EngineConfig,
}

impl<'a, A: Adapter> GepaEngine<'a, A> {
    pub fn new(
        adapter: &'a A,
        trainset: &'a [A::Example],
        valset: &'a [A::Example],
        oracle: Option<&'a dyn ReflectionOracle>,
        config: EngineConfig,
    ) -> GepaResult<Self> {
        config.validate()?;
        if trainset.is_empty() {
            return Err(GepaError::Config("training set is empty".to_string()));
        }
        if valset.is_empty() {
            return Err(GepaError::Config("validation set is empty".to_string()));
        }
        Ok(Self {
            adapter,
            trainset,
            valset,
            oracle,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Optimize from `seed_candidate`, or resume from the run directory's
    /// checkpoint when one exists.
    pub fn run(&self, seed_candidate: Candidate) -> GepaResult<OptimizationResult> {
        let run_dir = self.config.run_dir.as_deref();

        let mut state = match run_dir.map(GepaState::load).transpose()?.flatten() {
            Some(state) => {
                info!(
                    iteration = state.i,
                    candidates = state.len(),
                    "resumed from checkpoint"
                );
                state
            }
            None => self.initialize(seed_candidate)?,
        };

        let mut reflective = self.reflective_proposer()?;
        let mut merge = MergeProposer::new(
            self.adapter,
            self.valset,
            self.config.use_merge,
            self.config.max_merge_invocations,
            self.config.derived_seed(config::MERGE_STREAM),
        )
        .with_subsample_size(self.config.merge_subsample_size);
        let mut stop = AnyStop::from_config(&self.config);

        loop {
            if stop.should_stop(&state) {
                info!(reason = stop.reason().unwrap_or("stopped"), "stopping");
                break;
            }

            state.begin_trace();
            if let Some(dir) = run_dir {
                state.save(dir)?;
            }

            let span = info_span!("iteration", i = state.i);
            let outcome =
                span.in_scope(|| self.run_iteration(&mut state, &mut reflective, &mut merge));

            if let Err(e) = outcome {
                if e.is_contract_violation() || self.config.raise_on_exception {
                    error!(iteration = state.i, error = %e, "iteration failed, stopping");
                    self.checkpoint_quietly(&state, run_dir);
                    return Err(e);
                }
                warn!(iteration = state.i, error = %e, "iteration failed, continuing");
            }

            state.i += 1;
        }

        if let Some(dir) = run_dir {
            state.save(dir)?;
        }

        info!(
            candidates = state.len(),
            best = state.best_idx(),
            score = state.best_score(),
            metric_calls = state.total_num_evals,
            "optimization finished"
        );

        Ok(OptimizationResult::from_state(
            &state,
            self.config.seed,
            self.config.run_dir.clone(),
        ))
    }

    fn initialize(&self, seed_candidate: Candidate) -> GepaResult<GepaState> {
        let eval = adapter::evaluate_checked(self.adapter, self.valset, &seed_candidate, false)?;
        let state = GepaState::new(seed_candidate, eval.scores, self.valset.len())?;
        info!(
            score = state.best_score(),
            valset = self.valset.len(),
            "evaluated seed program"
        );
        Ok(state)
    }

    fn reflective_proposer(&self) -> GepaResult<ReflectiveMutationProposer<'a, A>> {
        let settings = &self.config;
        Ok(ReflectiveMutationProposer::new(
            self.adapter,
            self.trainset,
            candidate_selector_for(
                settings.candidate_selection_strategy,
                settings.epsilon,
                settings.derived_seed(config::CANDIDATE_STREAM),
            ),
            component_selector_for(settings.component_selector),
            Box::new(EpochShuffledBatchSampler::new(
                settings.reflection_minibatch_size,
                settings.derived_seed(config::SAMPLER_STREAM),
            )),
            self.oracle,
        )?
        .with_perfect_score(settings.skip_perfect_score, settings.perfect_score))
    }

    fn run_iteration(
        &self,
        state: &mut GepaState,
        reflective: &mut ReflectiveMutationProposer<'a, A>,
        merge: &mut MergeProposer<'a, A>,
    ) -> GepaResult<()> {
        if merge.is_due() {
            let proposal = merge.propose(state)?;
            merge.last_iter_found_new_program = false;

            if let Some(proposal) = proposal {
                merge.record_tested();
                let best_parent = proposal.best_parent_score();
                if proposal.score_after() >= best_parent {
                    self.accept(state, proposal)?;
                } else {
                    self.reject(state, &proposal, best_parent);
                }
                return Ok(());
            }
        }
        merge.last_iter_found_new_program = false;

        let Some(proposal) = reflective.propose(state)? else {
            return Ok(());
        };

        let before = proposal.best_parent_score();
        if proposal.score_after() > before {
            self.accept(state, proposal)?;
            merge.last_iter_found_new_program = true;
            merge.schedule();
        } else {
            self.reject(state, &proposal, before);
        }
        Ok(())
    }

    /// Score a proposal on the full validation set and add it.
    fn accept(&self, state: &mut GepaState, proposal: CandidateProposal) -> GepaResult<usize> {
        let discovered_at = state.total_num_evals;
        let eval = adapter::evaluate_checked(self.adapter, self.valset, &proposal.candidate, false)?;
        state.total_num_evals += self.valset.len();
        state.num_full_ds_evals += 1;

        let previous_best = state.best_score();
        let id = state.add_program(
            proposal.candidate,
            &proposal.parent_program_ids,
            eval.scores,
            discovered_at,
        )?;

        {
            let trace = state.current_trace_mut();
            trace.accepted = Some(true);
            trace.new_program_idx = Some(id);
        }

        let score = state.agg_scores()[id];
        info!(
            tag = %proposal.tag,
            parents = ?proposal.parent_program_ids,
            score,
            "accepted program {}",
            id
        );
        if score > previous_best {
            info!(score, previous = previous_best, "new best program {}", id);
        }
        Ok(id)
    }

    fn reject(&self, state: &mut GepaState, proposal: &CandidateProposal, before: f64) {
        state.current_trace_mut().accepted = Some(false);
        let comparison = match proposal.tag {
            ProposalTag::ReflectiveMutation => "not better than",
            ProposalTag::Merge => "worse than",
        };
        info!(
            tag = %proposal.tag,
            after = proposal.score_after(),
            before,
            "rejected proposal: subsample score {} parent",
            comparison
        );
    }

    fn checkpoint_quietly(&self, state: &GepaState, run_dir: Option<&Path>) {
        if let Some(dir) = run_dir {
            if let Err(e) = state.save(dir) {
                warn!(error = %e, "failed to checkpoint state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAdapter, candidate, fenced_oracle};

    const EXAMPLES: [usize; 3] = [0, 1, 2];

    fn config(max_iterations: usize) -> EngineConfig {
        EngineConfig {
            max_iterations: Some(max_iterations),
            ..Default::default()
        }
    }

    fn improving_adapter() -> ScriptedAdapter {
        ScriptedAdapter::new()
            .with_scores(&["v0"], vec![0.2, 0.2, 0.2])
            .with_scores(&["v1"], vec![0.8, 0.8, 0.8])
    }

    #[test]
    fn test_accepts_strict_improvement_only() {
        let adapter = improving_adapter();
        let oracle = fenced_oracle("v1");
        let engine =
            GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config(3)).unwrap();

        let result = engine.run(candidate(&[("qa", "v0")])).unwrap();

        // Iteration 0 accepts v1; later rewrites of v1 to v1 tie and are rejected.
        assert_eq!(result.num_candidates(), 2);
        assert_eq!(result.best_idx, 1);
        assert_eq!(result.best_candidate()["qa"], "v1");
        assert_eq!(result.parents, vec![vec![], vec![0]]);
        assert_eq!(result.iterations, 3);
        // Seed 3, accepted iteration 3 + 3 + 3, two rejected iterations 3 + 3.
        assert_eq!(result.total_metric_calls, 24);
        assert_eq!(result.num_full_val_evals, 2);
        assert_eq!(result.discovery_eval_counts, vec![0, 9]);
    }

    #[test]
    fn test_requires_stop_condition() {
        let adapter = improving_adapter();
        let oracle = fenced_oracle("v1");
        let result = GepaEngine::new(
            &adapter,
            &EXAMPLES,
            &EXAMPLES,
            Some(&oracle),
            EngineConfig::default(),
        );
        assert!(matches!(result, Err(GepaError::Config(_))));
    }

    #[test]
    fn test_budget_stops_run() {
        let adapter = improving_adapter();
        let oracle = fenced_oracle("v1");
        let config = EngineConfig {
            max_metric_calls: Some(10),
            ..Default::default()
        };
        let engine = GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config).unwrap();
        let result = engine.run(candidate(&[("qa", "v0")])).unwrap();
        assert_eq!(result.iterations, 1);
        assert_eq!(result.total_metric_calls, 12);
    }

    #[test]
    fn test_contract_violation_stops_run() {
        let adapter = ScriptedAdapter::new().with_native_texts(&[("missing", "x")]);
        let config = EngineConfig {
            raise_on_exception: false,
            ..config(5)
        };
        let engine = GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, None, config).unwrap();
        let err = engine.run(candidate(&[("qa", "v0")])).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_evaluation_errors_respect_raise_on_exception() {
        let oracle = fenced_oracle("v1");

        let adapter = improving_adapter().failing_evals_after(1);
        let engine =
            GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config(3)).unwrap();
        assert!(matches!(
            engine.run(candidate(&[("qa", "v0")])),
            Err(GepaError::Evaluation(_))
        ));

        let adapter = improving_adapter().failing_evals_after(1);
        let config = EngineConfig {
            raise_on_exception: false,
            ..config(3)
        };
        let engine = GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config).unwrap();
        let result = engine.run(candidate(&[("qa", "v0")])).unwrap();
        assert_eq!(result.iterations, 3);
        assert_eq!(result.num_candidates(), 1);
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = fenced_oracle("v1");
        let with_dir = |iterations| EngineConfig {
            run_dir: Some(dir.path().to_path_buf()),
            ..config(iterations)
        };

        let adapter = improving_adapter();
        let engine =
            GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), with_dir(1)).unwrap();
        let first = engine.run(candidate(&[("qa", "v0")])).unwrap();
        assert_eq!(first.iterations, 1);

        let adapter = improving_adapter();
        let engine =
            GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), with_dir(3)).unwrap();
        // The seed argument is ignored when a checkpoint exists.
        let second = engine.run(candidate(&[("qa", "ignored")])).unwrap();
        assert_eq!(second.iterations, 3);
        assert_eq!(second.candidates[..2], first.candidates[..]);
        assert!(second.total_metric_calls > first.total_metric_calls);

        let saved = GepaState::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.i, 3);
        assert_eq!(saved.full_program_trace.len(), 3);
    }

    #[test]
    fn test_resume_after_failed_iteration_keeps_one_trace_per_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = fenced_oracle("v1");
        let with_dir = || EngineConfig {
            run_dir: Some(dir.path().to_path_buf()),
            ..config(2)
        };

        let broken = improving_adapter().failing_evals_after(1);
        let engine =
            GepaEngine::new(&broken, &EXAMPLES, &EXAMPLES, Some(&oracle), with_dir()).unwrap();
        assert!(engine.run(candidate(&[("qa", "v0")])).is_err());

        let healthy = improving_adapter();
        let engine =
            GepaEngine::new(&healthy, &EXAMPLES, &EXAMPLES, Some(&oracle), with_dir()).unwrap();
        let result = engine.run(candidate(&[("qa", "v0")])).unwrap();
        assert_eq!(result.iterations, 2);

        let saved = GepaState::load(dir.path()).unwrap().unwrap();
        let iterations: Vec<usize> = saved.full_program_trace.iter().map(|t| t.i).collect();
        assert_eq!(iterations, vec![0, 1]);
        assert_eq!(saved.full_program_trace[0].accepted, Some(true));
    }

    #[test]
    fn test_stop_file_prevents_iterations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(stop::STOP_FILE), "").unwrap();
        let adapter = improving_adapter();
        let oracle = fenced_oracle("v1");
        let config = EngineConfig {
            run_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let engine = GepaEngine::new(&adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config).unwrap();
        let result = engine.run(candidate(&[("qa", "v0")])).unwrap();
        assert_eq!(result.iterations, 0);
        assert_eq!(result.num_candidates(), 1);
    }

    fn merge_state() -> GepaState {
        let mut state =
            GepaState::new(candidate(&[("a", "A"), ("b", "B")]), vec![0.0, 0.0], 0).unwrap();
        state
            .add_program(candidate(&[("a", "A1"), ("b", "B")]), &[0], vec![1.0, 0.0], 0)
            .unwrap();
        state
            .add_program(candidate(&[("a", "A"), ("b", "B2")]), &[0], vec![0.0, 1.0], 0)
            .unwrap();
        state.push_trace();
        state
    }

    fn run_merge_iteration(adapter: &ScriptedAdapter) -> (GepaState, usize, usize) {
        let val = [0, 1];
        let oracle = fenced_oracle("unused");
        let config = EngineConfig {
            use_merge: true,
            ..config(1)
        };
        let engine = GepaEngine::new(adapter, &val, &val, Some(&oracle), config).unwrap();

        let mut state = merge_state();
        let mut reflective = engine.reflective_proposer().unwrap();
        let mut merge = MergeProposer::new(adapter, &val, true, 5, 0);
        merge.schedule();
        merge.last_iter_found_new_program = true;

        engine
            .run_iteration(&mut state, &mut reflective, &mut merge)
            .unwrap();
        (state, merge.merges_due, merge.total_merges_tested)
    }

    #[test]
    fn test_merge_accepted_when_not_worse() {
        let adapter = ScriptedAdapter::new().with_scores(&["A1", "B2"], vec![1.0, 1.0]);
        let (state, due, tested) = run_merge_iteration(&adapter);

        assert_eq!(state.len(), 4);
        assert_eq!(state.parents()[3], vec![1, 2]);
        assert_eq!(state.candidates()[3], candidate(&[("a", "A1"), ("b", "B2")]));
        assert_eq!((due, tested), (0, 1));
        assert_eq!(state.full_program_trace[0].accepted, Some(true));
        // Merge subsample of 5, then the full validation set of 2.
        assert_eq!(adapter.examples_evaluated(), 7);
    }

    /// One `run_iteration` on a fresh seed state with a merge-enabled engine.
    fn run_mutation_iteration(
        adapter: &ScriptedAdapter,
        rewrite: &'static str,
        prepare: impl FnOnce(&mut MergeProposer<'_, ScriptedAdapter>),
    ) -> (GepaState, usize, usize, bool) {
        let oracle = fenced_oracle(rewrite);
        let config = EngineConfig {
            use_merge: true,
            max_merge_invocations: 2,
            ..config(1)
        };
        let engine =
            GepaEngine::new(adapter, &EXAMPLES, &EXAMPLES, Some(&oracle), config).unwrap();

        let mut state = GepaState::new(candidate(&[("qa", "v0")]), vec![0.2; 3], 3).unwrap();
        state.begin_trace();
        let mut reflective = engine.reflective_proposer().unwrap();
        let mut merge = MergeProposer::new(adapter, &EXAMPLES, true, 2, 0);
        prepare(&mut merge);

        engine
            .run_iteration(&mut state, &mut reflective, &mut merge)
            .unwrap();
        (
            state,
            merge.merges_due,
            merge.total_merges_tested,
            merge.last_iter_found_new_program,
        )
    }

    #[test]
    fn test_due_merge_without_pair_falls_through_to_mutation() {
        let adapter = improving_adapter();
        // A single-candidate population cannot merge; the rewrite ties.
        let (state, due, tested, found) = run_mutation_iteration(&adapter, "v0", |merge| {
            merge.schedule();
            merge.last_iter_found_new_program = true;
        });

        let trace = &state.full_program_trace[0];
        assert_eq!(trace.invoked_merge, Some(true));
        assert_eq!(trace.selected_program_candidate, Some(0));
        assert_eq!(trace.accepted, Some(false));
        assert_eq!(state.len(), 1);
        assert_eq!((due, tested, found), (1, 0, false));
    }

    #[test]
    fn test_accepted_mutation_schedules_merge() {
        let adapter = improving_adapter();
        let (state, due, tested, found) = run_mutation_iteration(&adapter, "v1", |_| {});

        assert_eq!(state.len(), 2);
        assert_eq!(state.full_program_trace[0].new_program_idx, Some(1));
        assert_eq!((due, tested, found), (1, 0, true));
    }

    #[test]
    fn test_accepted_mutation_respects_merge_cap() {
        let adapter = improving_adapter();
        let (state, due, tested, found) =
            run_mutation_iteration(&adapter, "v1", |merge| merge.total_merges_tested = 2);

        assert_eq!(state.len(), 2);
        assert_eq!((due, tested, found), (0, 2, true));
    }

    #[test]
    fn test_merge_rejected_when_worse() {
        let adapter = ScriptedAdapter::new();
        let (state, due, tested) = run_merge_iteration(&adapter);

        assert_eq!(state.len(), 3);
        assert_eq!((due, tested), (0, 1));
        assert_eq!(state.full_program_trace[0].accepted, Some(false));
        assert_eq!(adapter.examples_evaluated(), 5);
    }
}
