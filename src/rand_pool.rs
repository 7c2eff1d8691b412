//! Amortized uniform random source.
//!
//! Drawing one random number per dropout index is too expensive at scale, so
//! randomness is consumed from a large precomputed pool of uniform `f32`
//! values and the pool is regenerated in bulk when exhausted. The refill
//! splits the buffer into contiguous chunks processed on the worker pool,
//! each chunk with a private RNG seeded from the shared RNG (no shared
//! mutable RNG state across threads).
//!
//! The refill is destructive: the cursor resets to zero and the whole buffer
//! is regenerated, so values read across a refill boundary are unrelated.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;

use crate::pool::WorkerPool;

const DEFAULT_POOL_LEN: usize = 1 << 20;
const REFILL_CHUNK: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct RandomPool {
    values: Vec<f32>,
    cursor: usize,
    filled: bool,
}

impl Default for RandomPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPool {
    pub fn new() -> Self {
        Self::with_len(DEFAULT_POOL_LEN)
    }

    /// A pool holding `len` values (clamped to at least one refill chunk).
    pub fn with_len(len: usize) -> Self {
        Self {
            values: vec![0.0; len.max(REFILL_CHUNK)],
            cursor: 0,
            filled: false,
        }
    }

    /// Borrow `n` uniform values in `[0, 1)`, refilling first if fewer than
    /// `n` remain. `n` must not exceed the pool capacity (asserted).
    pub fn take(&mut self, n: usize, rng: &mut StdRng, workers: &WorkerPool) -> &[f32] {
        assert!(
            n <= self.values.len(),
            "requested {n} values from a pool of {}",
            self.values.len()
        );
        if !self.filled || self.cursor + n > self.values.len() {
            self.refill(rng, workers);
        }
        let start = self.cursor;
        self.cursor += n;
        &self.values[start..self.cursor]
    }

    fn refill(&mut self, rng: &mut StdRng, workers: &WorkerPool) {
        let chunks = self.values.len().div_ceil(REFILL_CHUNK);
        let seeds: Vec<u64> = (0..chunks).map(|_| rng.next_u64()).collect();

        workers.install(|| {
            self.values
                .par_chunks_mut(REFILL_CHUNK)
                .zip(seeds.par_iter())
                .for_each(|(chunk, &seed)| {
                    let mut chunk_rng = StdRng::seed_from_u64(seed);
                    for v in chunk {
                        *v = chunk_rng.gen();
                    }
                });
        });

        self.cursor = 0;
        self.filled = true;
        debug!("random pool refilled ({} values)", self.values.len());
    }
}
