//! Collaborator contracts: the program evaluator and the reflection oracle.
//!
//! The engine never runs candidates itself. An [`Adapter`] executes a
//! candidate on examples, turns execution traces into reflective records,
//! and may rewrite instructions natively. When it does not, a
//! [`ReflectionOracle`] (usually an LLM) is prompted per component.

pub mod agent;
pub mod command;

use crate::error::{GepaError, GepaResult};
use crate::types::{Candidate, ComponentTexts, EvaluationBatch, ReflectiveDataset};

pub use agent::{Agent, AgentOracle, call_agent};
pub use command::CommandAdapter;

/// Runs candidates against examples and explains their behavior.
///
/// Type parameters:
/// - `Example`: one task input (train or validation record)
/// - `Trajectory`: the execution trace captured for one example
pub trait Adapter {
    type Example: Clone;
    type Trajectory;

    /// Score `candidate` on `batch`, one score per example in batch order.
    ///
    /// Trajectories are returned only when `capture_traces` is set and the
    /// adapter could materialize them.
    fn evaluate(
        &self,
        batch: &[Self::Example],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> GepaResult<EvaluationBatch<Self::Trajectory>>;

    /// Per-component records (input, output, feedback) for reflection.
    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval: &EvaluationBatch<Self::Trajectory>,
        components: &[String],
    ) -> GepaResult<ReflectiveDataset>;

    /// Whether [`Adapter::propose_new_texts`] is implemented.
    fn supports_text_proposal(&self) -> bool {
        false
    }

    /// Native instruction rewriting, preferred over the oracle when available.
    fn propose_new_texts(
        &self,
        _candidate: &Candidate,
        _dataset: &ReflectiveDataset,
        _components: &[String],
    ) -> GepaResult<ComponentTexts> {
        Err(GepaError::Reflection(
            "adapter does not propose texts".to_string(),
        ))
    }
}

/// Turns a reflection prompt into free text.
pub trait ReflectionOracle {
    fn reflect(&self, prompt: &str) -> GepaResult<String>;
}

impl<F> ReflectionOracle for F
where
    F: Fn(&str) -> GepaResult<String>,
{
    fn reflect(&self, prompt: &str) -> GepaResult<String> {
        self(prompt)
    }
}

/// Evaluate and check the adapter returned one score per example.
pub fn evaluate_checked<A: Adapter + ?Sized>(
    adapter: &A,
    batch: &[A::Example],
    candidate: &Candidate,
    capture_traces: bool,
) -> GepaResult<EvaluationBatch<A::Trajectory>> {
    let eval = adapter.evaluate(batch, candidate, capture_traces)?;
    if eval.scores.len() != batch.len() {
        return Err(GepaError::ContractViolation(format!(
            "evaluator returned {} scores for {} examples",
            eval.scores.len(),
            batch.len()
        )));
    }
    Ok(eval)
}

/// Examples at `indices`, in index order.
pub fn select_examples<E: Clone>(examples: &[E], indices: &[usize]) -> GepaResult<Vec<E>> {
    indices
        .iter()
        .map(|&i| {
            examples.get(i).cloned().ok_or_else(|| {
                GepaError::ContractViolation(format!(
                    "example index {} out of range for {} examples",
                    i,
                    examples.len()
                ))
            })
        })
        .collect()
}
