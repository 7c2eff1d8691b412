//! Loss functions.
//!
//! Scalar losses over a target/prediction pair. During training these are
//! diagnostic only: the weight-update math consumes the raw error signal,
//! not the loss value (see `backprop`).

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Loss {
    /// Cross-entropy with a small floor inside the logarithm.
    CrossEntropy,
    MeanSquaredError,
    /// Quadratic near zero, linear beyond `delta`.
    Huber { delta: f32 },
    MeanAbsoluteError,
}

impl Loss {
    /// Validate loss parameters.
    pub fn validate(self) -> Result<()> {
        if let Loss::Huber { delta } = self {
            if !(delta.is_finite() && delta > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "huber delta must be finite and > 0, got {delta}"
                )));
            }
        }
        Ok(())
    }

    /// Compute the loss.
    ///
    /// Shape contract (asserted): `target.len() == predicted.len()`.
    pub fn apply(self, target: &[f32], predicted: &[f32]) -> f32 {
        assert_eq!(
            target.len(),
            predicted.len(),
            "target length {} does not match prediction length {}",
            target.len(),
            predicted.len()
        );
        if target.is_empty() {
            return 0.0;
        }

        let inv_n = 1.0 / target.len() as f32;
        match self {
            Loss::CrossEntropy => {
                let mut sum = 0.0_f32;
                for (&t, &p) in target.iter().zip(predicted) {
                    sum += t * (p + 1e-15).ln();
                }
                -sum * inv_n
            }
            Loss::MeanSquaredError => {
                let mut sum = 0.0_f32;
                for (&t, &p) in target.iter().zip(predicted) {
                    let e = t - p;
                    sum = e.mul_add(e, sum);
                }
                sum * inv_n
            }
            Loss::Huber { delta } => {
                let mut sum = 0.0_f32;
                for (&t, &p) in target.iter().zip(predicted) {
                    let e = (t - p).abs();
                    sum += if e > delta {
                        e * delta - 0.5 * delta * delta
                    } else {
                        0.5 * e * e
                    };
                }
                sum * inv_n
            }
            Loss::MeanAbsoluteError => {
                let mut sum = 0.0_f32;
                for (&t, &p) in target.iter().zip(predicted) {
                    sum += (t - p).abs();
                }
                sum * inv_n
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huber_delta_must_be_positive() {
        assert!(Loss::Huber { delta: 0.0 }.validate().is_err());
        assert!(Loss::Huber { delta: f32::NAN }.validate().is_err());
        assert!(Loss::Huber { delta: 1.0 }.validate().is_ok());
    }

    #[test]
    fn mse_and_mae_basic_values() {
        let t = [1.0, 0.0];
        let p = [0.0, 0.0];
        assert!((Loss::MeanSquaredError.apply(&t, &p) - 0.5).abs() < 1e-6);
        assert!((Loss::MeanAbsoluteError.apply(&t, &p) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_rewards_confident_correct_predictions() {
        let target = [0.0, 1.0, 0.0];
        let confident = [0.05, 0.9, 0.05];
        let uncertain = [0.34, 0.33, 0.33];
        let good = Loss::CrossEntropy.apply(&target, &confident);
        let bad = Loss::CrossEntropy.apply(&target, &uncertain);
        assert!(good < bad);
        // The floor keeps a zero prediction finite.
        let zero = Loss::CrossEntropy.apply(&target, &[0.5, 0.0, 0.5]);
        assert!(zero.is_finite());
    }

    #[test]
    fn huber_blends_quadratic_and_linear_regimes() {
        let loss = Loss::Huber { delta: 1.0 };
        // Small error: quadratic, 0.5 * 0.5^2 = 0.125.
        assert!((loss.apply(&[0.5], &[0.0]) - 0.125).abs() < 1e-6);
        // Large error: linear, 3*1 - 0.5 = 2.5.
        assert!((loss.apply(&[3.0], &[0.0]) - 2.5).abs() < 1e-6);
    }
}
