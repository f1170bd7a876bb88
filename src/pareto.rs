//! Per-example Pareto utilities over candidate score matrices.
//!
//! Averaging scores across examples lets a search overfit to the easy ones.
//! Instead we keep, for every validation example, the set of candidates tied
//! for the best score on it. A candidate that is the only one to solve one
//! hard example stays selectable next to a candidate with a higher average.
//!
//! All functions here are pure; randomness is passed in.

use std::collections::BTreeSet;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use crate::error::{GepaError, GepaResult};

/// For each validation example, the ids of the candidates attaining the best
/// score on it (ties included).
pub type ParetoFront = Vec<BTreeSet<usize>>;

/// Compute the per-example front from `subscores_by_candidate[candidate][example]`.
///
/// Every score vector must have the same length; the front has one entry per
/// example. Scores are compared exactly.
pub fn front_for(subscores_by_candidate: &[Vec<f64>]) -> ParetoFront {
    let Some(first) = subscores_by_candidate.first() else {
        return Vec::new();
    };

    (0..first.len())
        .map(|example| {
            let best = subscores_by_candidate
                .iter()
                .map(|scores| scores[example])
                .fold(f64::NEG_INFINITY, f64::max);
            subscores_by_candidate
                .iter()
                .enumerate()
                .filter(|(_, scores)| scores[example] == best)
                .map(|(id, _)| id)
                .collect()
        })
        .collect()
}

/// Candidates that are best (or tied best) on at least one example.
///
/// This is the pool both candidate selection and merging draw from. The pool
/// is ordered by descending aggregate score, then by id.
pub fn find_dominator_programs(front: &[BTreeSet<usize>], agg_scores: &[f64]) -> Vec<usize> {
    let members: BTreeSet<usize> = front.iter().flatten().copied().collect();
    let mut pool: Vec<usize> = members.into_iter().collect();
    pool.sort_by(|&a, &b| {
        let (sa, sb) = (score_of(agg_scores, a), score_of(agg_scores, b));
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    pool
}

/// Pick a candidate from the front.
///
/// A validation example is chosen uniformly, then one member of that
/// example's front is sampled with probability proportional to its aggregate
/// score. When the weights sum to zero the choice is uniform.
pub fn select_program_candidate_from_pareto_front<R: Rng>(
    front: &[BTreeSet<usize>],
    agg_scores: &[f64],
    rng: &mut R,
) -> GepaResult<usize> {
    if front.is_empty() {
        return Err(GepaError::ContractViolation(
            "cannot select from an empty pareto front".to_string(),
        ));
    }

    let example = rng.gen_range(0..front.len());
    let members: Vec<usize> = front[example].iter().copied().collect();
    if members.is_empty() {
        return Err(GepaError::ContractViolation(format!(
            "pareto front for example {} has no members",
            example
        )));
    }

    let weights: Vec<f64> = members
        .iter()
        .map(|&id| score_of(agg_scores, id).max(0.0))
        .collect();
    let total: f64 = weights.iter().sum();

    if !(total > 0.0) || !total.is_finite() {
        return Ok(members[rng.gen_range(0..members.len())]);
    }

    let dist = WeightedIndex::new(&weights).map_err(|e| {
        GepaError::ContractViolation(format!("invalid selection weights: {}", e))
    })?;
    Ok(members[dist.sample(rng)])
}

/// Index of the maximum score, ties broken by first occurrence.
pub fn idxmax(agg_scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in agg_scores.iter().enumerate() {
        match best {
            Some((_, b)) if score <= b => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

fn score_of(agg_scores: &[f64], id: usize) -> f64 {
    agg_scores.get(id).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn set(ids: &[usize]) -> BTreeSet<usize> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_front_includes_ties() {
        let scores = vec![vec![1.0, 0.0, 0.5], vec![1.0, 0.2, 0.1], vec![0.0, 0.2, 0.5]];
        let front = front_for(&scores);
        assert_eq!(front, vec![set(&[0, 1]), set(&[1, 2]), set(&[0, 2])]);
    }

    #[test]
    fn test_front_empty_population() {
        assert!(front_for(&[]).is_empty());
    }

    #[test]
    fn test_dominators_are_front_members() {
        let front = vec![set(&[0, 1]), set(&[1]), set(&[3])];
        let agg = vec![0.2, 0.5, 0.9, 0.1];
        // Candidate 2 has the best average but wins nothing.
        assert_eq!(find_dominator_programs(&front, &agg), vec![1, 0, 3]);
    }

    #[test]
    fn test_select_only_returns_front_members() {
        let front = vec![set(&[0]), set(&[2]), set(&[0, 2])];
        let agg = vec![0.4, 0.9, 0.6];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = select_program_candidate_from_pareto_front(&front, &agg, &mut rng).unwrap();
            assert!(id == 0 || id == 2);
        }
    }

    #[test]
    fn test_select_weights_by_aggregate_score() {
        let front = vec![set(&[0, 1])];
        let agg = vec![0.1, 0.9];
        let mut rng = StdRng::seed_from_u64(1);
        let picks_of_1 = (0..2000)
            .filter(|_| select_program_candidate_from_pareto_front(&front, &agg, &mut rng).unwrap() == 1)
            .count();
        assert!(picks_of_1 > 1500, "higher aggregate should dominate: {}", picks_of_1);
    }

    #[test]
    fn test_select_zero_weights_falls_back_to_uniform() {
        let front = vec![set(&[0, 1])];
        let agg = vec![0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(3);
        let picks: BTreeSet<usize> = (0..100)
            .map(|_| select_program_candidate_from_pareto_front(&front, &agg, &mut rng).unwrap())
            .collect();
        assert_eq!(picks, set(&[0, 1]));
    }

    #[test]
    fn test_select_is_deterministic_for_seed() {
        let front = vec![set(&[0, 1, 2]), set(&[1, 2]), set(&[0])];
        let agg = vec![0.3, 0.5, 0.7];
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| select_program_candidate_from_pareto_front(&front, &agg, &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_select_empty_front_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_program_candidate_from_pareto_front(&[], &[], &mut rng).is_err());
    }

    #[test]
    fn test_idxmax_first_occurrence() {
        assert_eq!(idxmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(idxmax(&[]), None);
        assert_eq!(idxmax(&[-1.0]), Some(0));
    }
}
