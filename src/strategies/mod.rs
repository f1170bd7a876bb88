//! Pluggable policies used by the proposers.
//!
//! - `batch_sampler`: which training examples a mutation reflects on
//! - `candidate_selector`: which program to mutate next
//! - `component_selector`: which components of it to rewrite
//! - `instruction_proposal`: the reflection prompt and its answer parsing

pub mod batch_sampler;
pub mod candidate_selector;
pub mod component_selector;
pub mod instruction_proposal;

pub use batch_sampler::{BatchSampler, EpochShuffledBatchSampler};
pub use candidate_selector::{CandidateSelector, candidate_selector_for};
pub use component_selector::{ComponentSelector, component_selector_for};
