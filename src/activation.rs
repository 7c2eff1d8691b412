//! Activation functions.
//!
//! Each activation is a stateless transform exposing a batched in-place
//! forward (`apply_batch`) and a derivative written into a caller-supplied
//! buffer (`diff_batch`) so the training hot path stays allocation-free.
//! The derivative is evaluated at the stored layer values; for the ReLU
//! family the stored value's sign equals the pre-activation sign, which is
//! what the step-function derivative needs.
//!
//! Per-sample forms exist for completeness but some variants are batch-only
//! and return [`Error::Unsupported`] there.

use crate::matrix::Matrix;
use crate::{Error, Loss, Result};

const LEAK: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Activation {
    ReLU,
    LeakyReLU {
        alpha: f32,
    },
    /// S-shaped rectified linear unit: three linear pieces joined at
    /// `t_low` / `t_high`. Batch-only.
    SReLU {
        a_low: f32,
        a_mid: f32,
        a_high: f32,
        t_low: f32,
        t_high: f32,
    },
    /// Row-wise softmax with temperature `alpha`, numerically stabilized by
    /// subtracting the row maximum before exponentiating.
    Softmax {
        alpha: f32,
    },
    Linear,
}

impl Activation {
    /// Softmax with unit temperature.
    pub fn softmax() -> Self {
        Activation::Softmax { alpha: 1.0 }
    }

    /// Leaky ReLU with the conventional 0.01 slope.
    pub fn leaky_relu() -> Self {
        Activation::LeakyReLU { alpha: LEAK }
    }

    /// S-shaped ReLU with its reference parameterization.
    pub fn srelu() -> Self {
        Activation::SReLU {
            a_low: 0.1,
            a_mid: 1.0,
            a_high: 0.1,
            t_low: -1.0,
            t_high: 1.0,
        }
    }

    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::LeakyReLU { alpha } => {
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "leaky ReLU alpha must be finite and >= 0, got {alpha}"
                    )));
                }
            }
            Activation::SReLU { t_low, t_high, .. } => {
                if !(t_low.is_finite() && t_high.is_finite() && t_low < t_high) {
                    return Err(Error::InvalidConfig(format!(
                        "SReLU thresholds must be finite with t_low < t_high, got {t_low} and {t_high}"
                    )));
                }
            }
            Activation::Softmax { alpha } => {
                if !(alpha.is_finite() && alpha > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "softmax temperature must be finite and > 0, got {alpha}"
                    )));
                }
            }
            Activation::ReLU | Activation::Linear => {}
        }
        Ok(())
    }

    /// The loss this activation pairs with by default.
    pub fn suggest_loss(self) -> Loss {
        match self {
            Activation::Softmax { .. } => Loss::CrossEntropy,
            Activation::ReLU
            | Activation::LeakyReLU { .. }
            | Activation::SReLU { .. }
            | Activation::Linear => Loss::Huber { delta: 1.0 },
        }
    }

    /// Apply the activation in place over a whole batch matrix.
    ///
    /// Never changes the matrix extents, only its values.
    pub fn apply_batch(self, m: &mut Matrix) {
        match self {
            Activation::Softmax { alpha } => {
                let cols = m.cols();
                if cols == 0 {
                    return;
                }
                for row in m.data_mut().chunks_mut(cols) {
                    softmax_row(row, alpha);
                }
            }
            _ => self.apply_elementwise(m.data_mut()),
        }
    }

    /// Write the derivative (evaluated at the stored values in `input`) into
    /// `output`.
    ///
    /// Shape contract (asserted): `input` and `output` extents match.
    pub fn diff_batch(self, input: &Matrix, output: &mut Matrix) {
        assert_eq!(
            (input.rows(), input.cols()),
            (output.rows(), output.cols()),
            "diff output {}x{} does not match input {}x{}",
            output.rows(),
            output.cols(),
            input.rows(),
            input.cols()
        );

        match self {
            Activation::Softmax { alpha } => {
                let cols = input.cols();
                if cols == 0 {
                    return;
                }
                for (src, dst) in input
                    .data()
                    .chunks(cols)
                    .zip(output.data_mut().chunks_mut(cols))
                {
                    softmax_row_diff(src, dst, alpha);
                }
            }
            _ => self.diff_elementwise(input.data(), output.data_mut()),
        }
    }

    /// Per-sample forward.
    ///
    /// Batch-only variants (SReLU) return [`Error::Unsupported`].
    pub fn apply(self, values: &mut [f32]) -> Result<()> {
        match self {
            Activation::SReLU { .. } => Err(Error::Unsupported(
                "SReLU supports batch application only".to_owned(),
            )),
            Activation::Softmax { alpha } => {
                softmax_row(values, alpha);
                Ok(())
            }
            _ => {
                self.apply_elementwise(values);
                Ok(())
            }
        }
    }

    /// Per-sample derivative. Batch-only variants return
    /// [`Error::Unsupported`].
    pub fn diff(self, values: &[f32], output: &mut [f32]) -> Result<()> {
        assert_eq!(
            values.len(),
            output.len(),
            "diff output length {} does not match input length {}",
            output.len(),
            values.len()
        );
        match self {
            Activation::SReLU { .. } => Err(Error::Unsupported(
                "SReLU supports batch application only".to_owned(),
            )),
            Activation::Softmax { alpha } => {
                softmax_row_diff(values, output, alpha);
                Ok(())
            }
            _ => {
                self.diff_elementwise(values, output);
                Ok(())
            }
        }
    }

    fn apply_elementwise(self, data: &mut [f32]) {
        match self {
            Activation::ReLU => {
                for v in data {
                    *v = v.max(0.0);
                }
            }
            Activation::LeakyReLU { alpha } => {
                for v in data {
                    if *v < 0.0 {
                        *v *= alpha;
                    }
                }
            }
            Activation::SReLU {
                a_low,
                a_mid,
                a_high,
                t_low,
                t_high,
            } => {
                for v in data {
                    let x = *v;
                    *v = if x < t_low {
                        (x - t_low) * a_low + t_low * a_mid
                    } else if x < t_high {
                        x * a_mid
                    } else {
                        (x - t_high) * a_high + t_high * a_mid
                    };
                }
            }
            Activation::Linear => {}
            Activation::Softmax { .. } => unreachable!("softmax is handled row-wise"),
        }
    }

    fn diff_elementwise(self, input: &[f32], output: &mut [f32]) {
        match self {
            Activation::ReLU => {
                for (o, &x) in output.iter_mut().zip(input) {
                    *o = if x > 0.0 { 1.0 } else { 0.0 };
                }
            }
            Activation::LeakyReLU { alpha } => {
                for (o, &x) in output.iter_mut().zip(input) {
                    *o = if x > 0.0 { 1.0 } else { alpha };
                }
            }
            Activation::SReLU {
                a_low,
                a_mid,
                a_high,
                t_low,
                t_high,
            } => {
                for (o, &x) in output.iter_mut().zip(input) {
                    *o = if x < t_low {
                        a_low
                    } else if x < t_high {
                        a_mid
                    } else {
                        a_high
                    };
                }
            }
            Activation::Linear => output.fill(1.0),
            Activation::Softmax { .. } => unreachable!("softmax is handled row-wise"),
        }
    }
}

/// Stabilized softmax over one row: subtract the row maximum before
/// exponentiating. If the row sum still collapses to zero the row degrades
/// to all zeros rather than producing NaN.
fn softmax_row(row: &mut [f32], alpha: f32) {
    let max = row
        .iter()
        .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v * alpha));
    let mut sum = 0.0_f32;
    for v in row.iter_mut() {
        let e = (*v * alpha - max).exp();
        sum += e;
        *v = e;
    }
    if sum > 0.0 {
        let inv = 1.0 / sum;
        for v in row.iter_mut() {
            *v *= inv;
        }
    } else {
        row.fill(0.0);
    }
}

/// Diagonal of the softmax Jacobian, `p * (1 - p)`, with `p` recomputed from
/// the stored row through the stabilized form.
fn softmax_row_diff(row: &[f32], out: &mut [f32], alpha: f32) {
    let max = row
        .iter()
        .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v * alpha));
    let mut sum = 0.0_f32;
    for (o, &v) in out.iter_mut().zip(row) {
        let e = (v * alpha - max).exp();
        sum += e;
        *o = e;
    }
    if sum > 0.0 {
        let inv = 1.0 / sum;
        for o in out.iter_mut() {
            let p = *o * inv;
            *o = p * (1.0 - p);
        }
    } else {
        out.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(Activation::LeakyReLU { alpha: -0.1 }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: f32::NAN }.validate().is_err());
        assert!(Activation::Softmax { alpha: 0.0 }.validate().is_err());
        assert!(
            Activation::SReLU {
                a_low: 0.1,
                a_mid: 1.0,
                a_high: 0.1,
                t_low: 1.0,
                t_high: -1.0,
            }
            .validate()
            .is_err()
        );
        assert!(Activation::leaky_relu().validate().is_ok());
        assert!(Activation::srelu().validate().is_ok());
    }

    #[test]
    fn relu_family_values_and_derivatives() {
        let mut m = Matrix::from_vec(1, 4, vec![-2.0, -0.5, 0.5, 3.0]).unwrap();
        Activation::ReLU.apply_batch(&mut m);
        assert_eq!(m.data(), &[0.0, 0.0, 0.5, 3.0]);

        let mut m = Matrix::from_vec(1, 4, vec![-2.0, -0.5, 0.5, 3.0]).unwrap();
        Activation::leaky_relu().apply_batch(&mut m);
        assert_eq!(m.data(), &[-0.02, -0.005, 0.5, 3.0]);

        let input = Matrix::from_vec(1, 3, vec![-1.0, 0.5, 2.0]).unwrap();
        let mut diff = Matrix::zeros(1, 3);
        Activation::leaky_relu().diff_batch(&input, &mut diff);
        assert_eq!(diff.data(), &[LEAK, 1.0, 1.0]);
    }

    #[test]
    fn srelu_is_piecewise_linear() {
        let mut m = Matrix::from_vec(1, 3, vec![-2.0, 0.5, 2.0]).unwrap();
        Activation::srelu().apply_batch(&mut m);
        // (-2 + 1)*0.1 - 1 = -1.1; 0.5; (2 - 1)*0.1 + 1 = 1.1
        assert_eq!(m.data(), &[-1.1, 0.5, 1.1]);

        let input = Matrix::from_vec(1, 3, vec![-2.0, 0.5, 2.0]).unwrap();
        let mut diff = Matrix::zeros(1, 3);
        Activation::srelu().diff_batch(&input, &mut diff);
        assert_eq!(diff.data(), &[0.1, 1.0, 0.1]);
    }

    #[test]
    fn srelu_rejects_per_sample_calls() {
        let mut v = [0.0_f32; 3];
        assert!(matches!(
            Activation::srelu().apply(&mut v),
            Err(Error::Unsupported(_))
        ));
        let mut out = [0.0_f32; 3];
        assert!(Activation::srelu().diff(&v, &mut out).is_err());
    }

    #[test]
    fn softmax_rows_sum_to_one_even_for_large_inputs() {
        let mut m = Matrix::from_vec(
            3,
            4,
            vec![
                1.0, 2.0, 3.0, 4.0, //
                1000.0, 1000.0, 1000.0, 1000.0, //
                -1000.0, 0.0, 500.0, 880.0,
            ],
        )
        .unwrap();
        Activation::softmax().apply_batch(&mut m);
        for row in m.data().chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "row sum {sum}");
            assert!(row.iter().all(|p| p.is_finite()));
        }
    }

    #[test]
    fn softmax_keeps_relative_order() {
        let mut m = Matrix::from_vec(1, 3, vec![1.0, 3.0, 2.0]).unwrap();
        Activation::softmax().apply_batch(&mut m);
        let d = m.data();
        assert!(d[1] > d[2] && d[2] > d[0]);
    }

    #[test]
    fn suggested_losses_follow_the_pairing_table() {
        assert_eq!(Activation::softmax().suggest_loss(), Loss::CrossEntropy);
        assert_eq!(Activation::ReLU.suggest_loss(), Loss::Huber { delta: 1.0 });
        assert_eq!(
            Activation::Linear.suggest_loss(),
            Loss::Huber { delta: 1.0 }
        );
    }

    #[test]
    fn apply_batch_preserves_extents() {
        let mut m = Matrix::zeros(5, 7);
        for act in [
            Activation::ReLU,
            Activation::leaky_relu(),
            Activation::srelu(),
            Activation::softmax(),
            Activation::Linear,
        ] {
            act.apply_batch(&mut m);
            assert_eq!((m.rows(), m.cols()), (5, 7));
        }
    }
}
