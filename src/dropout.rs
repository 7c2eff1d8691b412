//! Inverted dropout.
//!
//! A dropout policy draws a fresh index set per training forward pass,
//! zeroes those elements, and exposes the inverse-keep-probability factor
//! `1 / (1 - rate)` that the optimizer step multiplies into its learning
//! rate to counteract the expected-value shrinkage (inverted dropout).
//!
//! The number of indices drawn is the Poisson approximation
//! `-size * ln(1 - rate)`, with duplicates permitted; the expected fraction
//! of *distinct* zeroed elements then converges to `rate`. Indices come from
//! the shared [`RandomPool`], not from per-index RNG calls.

use rand::rngs::StdRng;

use crate::pool::WorkerPool;
use crate::rand_pool::RandomPool;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dropout {
    rate: f32,
}

impl Default for Dropout {
    fn default() -> Self {
        Self::none()
    }
}

impl Dropout {
    /// A disabled policy: no masking, unit scale.
    #[inline]
    pub fn none() -> Self {
        Self { rate: 0.0 }
    }

    /// A policy dropping an expected `rate` fraction of elements.
    ///
    /// `rate` must be finite and in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0, 1), got {rate}"
            )));
        }
        Ok(Self { rate })
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// The inverse keep probability, `1 / (1 - rate)`.
    #[inline]
    pub fn scale(&self) -> f32 {
        1.0 / (1.0 - self.rate)
    }

    /// Draw a fresh index set over a buffer of `size` elements into
    /// `indexes` (cleared first, reused across steps).
    ///
    /// A zero rate short-circuits without touching the random pool.
    pub fn init_into(
        &self,
        size: usize,
        indexes: &mut Vec<usize>,
        randoms: &mut RandomPool,
        rng: &mut StdRng,
        workers: &WorkerPool,
    ) {
        indexes.clear();
        if self.rate == 0.0 || size == 0 {
            return;
        }

        let expected = -(size as f64) * (1.0 - self.rate as f64).ln();
        let count = (expected.round() as usize).min(size);
        if count == 0 {
            return;
        }

        let values = randoms.take(count, rng, workers);
        indexes.extend(
            values
                .iter()
                .map(|&v| ((v * size as f32) as usize).min(size - 1)),
        );
    }

    /// Convenience form of [`Dropout::init_into`] allocating the index set.
    pub fn init(
        &self,
        size: usize,
        randoms: &mut RandomPool,
        rng: &mut StdRng,
        workers: &WorkerPool,
    ) -> Vec<usize> {
        let mut indexes = Vec::new();
        self.init_into(size, &mut indexes, randoms, rng, workers);
        indexes
    }

    /// Zero every indexed element in place.
    ///
    /// Replaying the same index set on the forward activations and on the
    /// backward derivative matrix keeps the mask consistent within one
    /// training step.
    pub fn apply(&self, data: &mut [f32], indexes: &[usize]) {
        for &i in indexes {
            data[i] = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn fixture() -> (RandomPool, StdRng, WorkerPool) {
        (
            RandomPool::with_len(1 << 18),
            StdRng::seed_from_u64(7),
            WorkerPool::new(1).unwrap(),
        )
    }

    #[test]
    fn rate_must_be_a_probability_below_one() {
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(f32::NAN).is_err());
        assert!(Dropout::new(0.0).is_ok());
        assert!(Dropout::new(0.99).is_ok());
    }

    #[test]
    fn zero_rate_is_a_no_op_with_unit_scale() {
        let (mut randoms, mut rng, workers) = fixture();
        let d = Dropout::none();
        assert_eq!(d.scale(), 1.0);
        let indexes = d.init(1024, &mut randoms, &mut rng, &workers);
        assert!(indexes.is_empty());

        let mut data = vec![1.0_f32; 16];
        d.apply(&mut data, &indexes);
        assert!(data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn scale_is_the_inverse_keep_probability() {
        let d = Dropout::new(0.5).unwrap();
        assert!((d.scale() - 2.0).abs() < 1e-6);
        let d = Dropout::new(0.2).unwrap();
        assert!((d.scale() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn zeroed_fraction_converges_to_the_rate() {
        let (mut randoms, mut rng, workers) = fixture();
        let size = 20_000;
        let d = Dropout::new(0.5).unwrap();

        let mut data = vec![1.0_f32; size];
        let indexes = d.init(size, &mut randoms, &mut rng, &workers);
        d.apply(&mut data, &indexes);

        let zeroed = data.iter().filter(|&&v| v == 0.0).count();
        let fraction = zeroed as f64 / size as f64;
        assert!(
            (fraction - 0.5).abs() < 0.04,
            "zeroed fraction {fraction} strays from rate 0.5"
        );
    }

    #[test]
    fn indexes_stay_in_bounds() {
        let (mut randoms, mut rng, workers) = fixture();
        let d = Dropout::new(0.9).unwrap();
        let size = 100;
        for _ in 0..50 {
            let indexes = d.init(size, &mut randoms, &mut rng, &workers);
            assert!(indexes.iter().all(|&i| i < size));
        }
    }
}
