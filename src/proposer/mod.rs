//! Proposers: the two ways a new candidate is produced.
//!
//! Both read and annotate the shared [`GepaState`] and hand back a
//! [`CandidateProposal`]. Acceptance is the engine's decision; a proposer
//! never appends to the population. `Ok(None)` means nothing to propose this
//! round.

pub mod merge;
pub mod reflective_mutation;

use crate::error::GepaResult;
use crate::state::GepaState;
use crate::types::CandidateProposal;

pub use merge::MergeProposer;
pub use reflective_mutation::ReflectiveMutationProposer;

pub trait ProposeNewCandidate {
    fn propose(&mut self, state: &mut GepaState) -> GepaResult<Option<CandidateProposal>>;
}
