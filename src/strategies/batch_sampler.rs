//! Epoch-shuffled minibatch sampling over the training set.
//!
//! Once per epoch the sampler draws a fresh permutation of the training ids.
//! When the training set is not a multiple of the minibatch size, the
//! permutation is padded with the least-used ids so every minibatch has the
//! same size and every id is seen at least once per epoch.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{GepaError, GepaResult};

/// Produces the training ids to evaluate at a given iteration.
pub trait BatchSampler {
    fn next_minibatch_indices(
        &mut self,
        trainset_size: usize,
        iteration: usize,
    ) -> GepaResult<Vec<usize>>;
}

#[derive(Debug)]
pub struct EpochShuffledBatchSampler {
    minibatch_size: usize,
    shuffled_ids: Vec<usize>,
    epoch: Option<usize>,
    id_freqs: Vec<usize>,
    rng: StdRng,
}

impl EpochShuffledBatchSampler {
    pub fn new(minibatch_size: usize, seed: u64) -> Self {
        Self {
            minibatch_size,
            shuffled_ids: Vec::new(),
            epoch: None,
            id_freqs: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn reshuffle(&mut self, trainset_size: usize) {
        self.id_freqs.resize(trainset_size, 0);

        self.shuffled_ids = (0..trainset_size).collect();
        self.shuffled_ids.shuffle(&mut self.rng);
        for &id in &self.shuffled_ids {
            self.id_freqs[id] += 1;
        }

        let remainder = trainset_size % self.minibatch_size;
        if remainder == 0 {
            return;
        }
        for _ in 0..self.minibatch_size - remainder {
            // Least used id; smallest id on ties.
            let Some(id) = (0..trainset_size).min_by_key(|&id| (self.id_freqs[id], id)) else {
                return;
            };
            self.shuffled_ids.push(id);
            self.id_freqs[id] += 1;
        }
    }
}

impl BatchSampler for EpochShuffledBatchSampler {
    fn next_minibatch_indices(
        &mut self,
        trainset_size: usize,
        iteration: usize,
    ) -> GepaResult<Vec<usize>> {
        let mb = self.minibatch_size;
        if mb == 0 {
            return Err(GepaError::Config(
                "minibatch size must be positive".to_string(),
            ));
        }
        if trainset_size == 0 {
            return Err(GepaError::Config("training set is empty".to_string()));
        }

        let base = iteration * mb;
        let current_epoch = match self.epoch {
            None => 0,
            Some(_) => base / self.shuffled_ids.len().max(1),
        };
        if self.epoch.is_none_or(|epoch| current_epoch > epoch) {
            self.epoch = Some(current_epoch);
            self.reshuffle(trainset_size);
        }

        let len = self.shuffled_ids.len();
        if len < mb || len % mb != 0 {
            return Err(GepaError::Config(format!(
                "padded permutation of length {} is not a multiple of minibatch size {}",
                len, mb
            )));
        }

        let start = base % len;
        Ok(self.shuffled_ids[start..start + mb].to_vec())
    }
}
