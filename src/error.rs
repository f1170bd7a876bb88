//! Error taxonomy for the optimizer.
//!
//! "Nothing to propose this round" is not an error: proposers return
//! `Ok(None)` for soft aborts. Everything here is either a collaborator
//! failure or a broken contract.

use thiserror::Error;

/// Errors raised by the engine, its strategies and its collaborators.
#[derive(Debug, Error)]
pub enum GepaError {
    /// Invalid configuration (zero minibatch, empty dataset, unknown strategy).
    #[error("configuration error: {0}")]
    Config(String),

    /// A collaborator or internal invariant broke its contract. Never retried.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The evaluator failed to run a candidate.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Building the reflective dataset or proposing new text failed.
    #[error("reflection failed: {0}")]
    Reflection(String),

    /// An agent CLI could not be spawned or returned an error.
    #[error("agent error: {0}")]
    Agent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GepaError {
    /// Contract violations indicate a bug in a collaborator and end the run.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, GepaError::ContractViolation(_))
    }
}

/// Result type for optimizer operations.
pub type GepaResult<T> = Result<T, GepaError>;
