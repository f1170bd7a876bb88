//! One-call entry point.

use crate::adapter::{Adapter, ReflectionOracle};
use crate::config::EngineConfig;
use crate::engine::{GepaEngine, OptimizationResult};
use crate::error::GepaResult;
use crate::types::Candidate;

/// Optimize `seed_candidate` against `trainset`, scoring on `valset`.
///
/// Without a validation set the training set doubles as one. `oracle` may be
/// `None` only when the adapter proposes texts natively.
///
/// ```no_run
/// use gepa::{EngineConfig, optimize};
/// use gepa::adapter::{AgentOracle, CommandAdapter};
///
/// # fn main() -> gepa::GepaResult<()> {
/// let adapter = CommandAdapter::from_command_line("python eval.py")?;
/// let trainset = vec![serde_json::json!({"question": "2+2", "answer": "4"})];
/// let seed = gepa::Candidate::from([("qa".to_string(), "Answer the question.".to_string())]);
/// let config = EngineConfig {
///     max_metric_calls: Some(200),
///     ..Default::default()
/// };
/// let oracle = AgentOracle::default();
/// let result = optimize(&adapter, &trainset, None, seed, Some(&oracle), config)?;
/// println!("{}", result.best_score());
/// # Ok(())
/// # }
/// ```
pub fn optimize<A: Adapter>(
    adapter: &A,
    trainset: &[A::Example],
    valset: Option<&[A::Example]>,
    seed_candidate: Candidate,
    oracle: Option<&dyn ReflectionOracle>,
    config: EngineConfig,
) -> GepaResult<OptimizationResult> {
    let valset = valset.unwrap_or(trainset);
    GepaEngine::new(adapter, trainset, valset, oracle, config)?.run(seed_candidate)
}
