//! gepa - Genetic-Pareto optimization of text instructions
//!
//! Evolves a program made of named text components (instructions, prompts)
//! by reflecting on execution traces and rewriting one component at a time.
//! Candidates are kept on a per-example Pareto front so a program that wins
//! on even one validation example can still be chosen for mutation.
//!
//! # Architecture
//!
//! ```text
//!  select parent ─→ sample minibatch ─→ evaluate + trace ─→ reflect ─→ rewrite
//!   (Pareto front)    (epoch shuffle)       (Adapter)        (Oracle)  component
//!        ↑                                                                 ↓
//!   GepaState ←── full val eval ←── accept if minibatch score improves ←──┘
//!        │
//!        └─→ merge: recombine two descendants of a common ancestor
//! ```
//!
//! # Entry points
//!
//! - [`optimize`]: one call from seed candidate to [`OptimizationResult`]
//! - [`GepaEngine`]: the loop itself, with resumable checkpoints
//! - [`adapter::Adapter`] / [`adapter::ReflectionOracle`]: what a caller plugs in

pub mod adapter;
pub mod api;
pub mod candidate;
pub mod config;
pub mod engine;
pub mod error;
pub mod pareto;
pub mod proposer;
pub mod state;
pub mod strategies;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use types::{
    Candidate, CandidateProposal, ComponentTexts, EvaluationBatch, ProposalTag, ReflectiveDataset,
};

pub use api::optimize;
pub use config::{CandidateSelection, ComponentSelection, EngineConfig};
pub use engine::{GepaEngine, OptimizationResult};
pub use error::{GepaError, GepaResult};
pub use state::GepaState;
