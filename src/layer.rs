//! A named bundle of owned parameters plus swappable strategy values.
//!
//! A `Layer` exclusively owns its weight matrix and bias vector; the
//! activation/loss/dropout/regularization strategies are stateless values
//! (flat enums), so sharing a configuration between layers is a copy, not an
//! aliasing question. Optimizer accumulators deliberately live outside the
//! layer (see `optimizer`), keyed by layer position, so optimizers stay
//! swappable.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Normal;

use crate::matrix::Matrix;
use crate::{Activation, Dropout, Error, Loss, Regularization, Result};

#[derive(Debug, Clone)]
pub struct Layer {
    size: usize,
    /// `None` for the input anchor layer, which carries no parameters and
    /// exists to attach dropout to the raw input.
    weights: Option<Matrix>,
    bias: Vec<f32>,
    activation: Activation,
    loss: Loss,
    dropout: Dropout,
    regularization: Regularization,
    /// Dropout index set recorded by the last training forward pass and
    /// replayed on the backward derivative. Not meaningful across steps.
    pub(crate) mask: Vec<usize>,
}

impl Layer {
    /// The input anchor: no weights, no bias, dropout on the raw input.
    pub(crate) fn input(size: usize, dropout: Dropout) -> Self {
        Self {
            size,
            weights: None,
            bias: Vec::new(),
            activation: Activation::Linear,
            loss: Loss::Huber { delta: 1.0 },
            dropout,
            regularization: Regularization::None,
            mask: Vec::new(),
        }
    }

    /// A dense layer with `size` units fed by `fan_in` inputs.
    ///
    /// Weights are stored row-major with shape `(size, fan_in)` and drawn
    /// from a Gaussian scaled by `1 / sqrt(fan_in)`; the bias starts at zero.
    pub(crate) fn dense(
        fan_in: usize,
        size: usize,
        activation: Activation,
        loss: Loss,
        dropout: Dropout,
        regularization: Regularization,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let sd = 1.0 / (fan_in as f32).sqrt();
        let normal = Normal::new(0.0, sd)
            .map_err(|e| Error::InvalidConfig(format!("weight init distribution: {e}")))?;
        let data: Vec<f32> = (0..fan_in * size).map(|_| rng.sample(normal)).collect();

        Ok(Self {
            size,
            weights: Some(Matrix::from_vec(size, fan_in, data)?),
            bias: vec![0.0; size],
            activation,
            loss,
            dropout,
            regularization,
            mask: Vec::new(),
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fan-in of a dense layer; zero for the input anchor.
    #[inline]
    pub fn fan_in(&self) -> usize {
        self.weights.as_ref().map_or(0, Matrix::cols)
    }

    #[inline]
    pub fn weights(&self) -> Option<&Matrix> {
        self.weights.as_ref()
    }

    #[inline]
    pub fn weights_mut(&mut self) -> Option<&mut Matrix> {
        self.weights.as_mut()
    }

    #[inline]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    #[inline]
    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn loss(&self) -> Loss {
        self.loss
    }

    #[inline]
    pub fn dropout(&self) -> Dropout {
        self.dropout
    }

    #[inline]
    pub fn regularization(&self) -> Regularization {
        self.regularization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn dense_layer_shapes_and_init_scale() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = Layer::dense(
            100,
            50,
            Activation::ReLU,
            Loss::Huber { delta: 1.0 },
            Dropout::none(),
            Regularization::None,
            &mut rng,
        )
        .unwrap();

        let w = layer.weights().unwrap();
        assert_eq!((w.rows(), w.cols()), (50, 100));
        assert_eq!(layer.bias().len(), 50);
        assert!(layer.bias().iter().all(|&b| b == 0.0));

        // Sample standard deviation should sit near 1/sqrt(fan_in) = 0.1.
        let n = w.len() as f32;
        let mean: f32 = w.data().iter().sum::<f32>() / n;
        let var: f32 = w.data().iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let sd = var.sqrt();
        assert!((sd - 0.1).abs() < 0.02, "sample sd {sd}");
    }

    #[test]
    fn input_anchor_has_no_parameters() {
        let layer = Layer::input(784, Dropout::none());
        assert!(layer.weights().is_none());
        assert_eq!(layer.fan_in(), 0);
        assert!(layer.bias().is_empty());
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let mk = || {
            let mut rng = StdRng::seed_from_u64(9);
            Layer::dense(
                4,
                3,
                Activation::ReLU,
                Loss::Huber { delta: 1.0 },
                Dropout::none(),
                Regularization::None,
                &mut rng,
            )
            .unwrap()
        };
        let a = mk();
        let b = mk();
        assert_eq!(a.weights().unwrap().data(), b.weights().unwrap().data());
    }
}
