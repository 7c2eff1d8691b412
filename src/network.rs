//! The feed-forward network: an ordered layer list with batched evaluation
//! and a single train-on-batch entry point.
//!
//! Construction goes through [`NetworkBuilder`]; the layer sequence is fixed
//! after `build`. Epoch counts, shuffling, and termination criteria belong
//! to the caller; the engine's training surface is one batch update.

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backprop::Backprop;
use crate::layer::Layer;
use crate::matrix::{Matrix, MatrixView};
use crate::optimizer::OptimizerState;
use crate::pool::WorkerPool;
use crate::rand_pool::RandomPool;
use crate::{ops, Activation, Dropout, Error, Loss, Regularization, Result};

/// Fraction of training steps on which regularization runs.
const REGULARIZATION_PROBABILITY: f32 = 0.1;

/// How bias vectors are updated during training.
///
/// The default is a fixed small step decoupled from the optimizer's
/// adaptive rate; biases can instead route through the same optimizer as
/// the weights. Neither behavior is hard-coded.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BiasPolicy {
    /// `bias -= step * column_mean(gradient)`.
    FixedStep(f32),
    /// The column-mean bias gradient goes through the same optimizer as the
    /// weights, under separate accumulator slots.
    Optimizer,
}

impl Default for BiasPolicy {
    fn default() -> Self {
        BiasPolicy::FixedStep(0.1)
    }
}

/// Output of one training step.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// The batch's forward output (post-dropout), one row per example.
    pub output: Vec<f32>,
    /// Summed per-layer diagnostic loss. Not part of the update math.
    pub loss: f32,
}

#[derive(Debug)]
pub struct Network {
    layers: Vec<Layer>,
    rng: StdRng,
    randoms: RandomPool,
    workers: WorkerPool,
    backprop: Option<Backprop>,
    bias_policy: BiasPolicy,
}

impl Network {
    #[inline]
    pub fn input_size(&self) -> usize {
        self.layers
            .first()
            .expect("network always has an input layer")
            .size()
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .expect("network always has an output layer")
            .size()
    }

    /// Layer count including the input anchor.
    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    #[inline]
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Total number of weights across all layers.
    pub fn volume(&self) -> usize {
        self.layers
            .iter()
            .filter_map(Layer::weights)
            .map(Matrix::len)
            .sum()
    }

    #[inline]
    pub fn bias_policy(&self) -> BiasPolicy {
        self.bias_policy
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.workers.threads()
    }

    /// Grow the worker pool (shrinking is not supported).
    pub fn grow_workers(&mut self, threads: usize) -> Result<()> {
        self.workers.grow(threads)
    }

    /// Evaluate a batch.
    ///
    /// `input` holds `k` examples of `input_size` values each, row-major;
    /// the output holds `k` rows of `output_size` values in the same order.
    /// No dropout and no gradient bookkeeping happen here.
    pub fn eval_batch(&self, input: &[f32]) -> Result<Vec<f32>> {
        let batch = self.check_batch(input)?;
        let mut x = Matrix::from_vec(batch, self.input_size(), input.to_vec())?;
        for layer in &self.layers[1..] {
            x = eval_layer(&x, layer, &self.workers)?;
        }
        Ok(x.into_data())
    }

    /// One training step over a batch.
    ///
    /// `target` holds `k` dense target rows of `output_size` values. The
    /// forward pass records dropout masks per layer, the backward pass
    /// replays them, and `optimizer` receives each layer's fresh gradient
    /// scaled by `eta` times the layer's inverted-dropout factor.
    pub fn train_batch(
        &mut self,
        optimizer: &mut OptimizerState,
        input: &[f32],
        target: &[f32],
        eta: f32,
    ) -> Result<TrainReport> {
        let batch = self.check_batch(input)?;
        if target.len() != batch * self.output_size() {
            return Err(Error::InvalidData(format!(
                "target length {} does not match batch {} x output size {}",
                target.len(),
                batch,
                self.output_size()
            )));
        }
        if !(eta.is_finite() && eta > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "eta must be finite and > 0, got {eta}"
            )));
        }

        // Forward, recording per-layer dropout masks as we go.
        let mut results: Vec<Matrix> = Vec::with_capacity(self.layers.len());
        let mut x = Matrix::from_vec(batch, self.input_size(), input.to_vec())?;
        mask_layer(
            &mut self.layers[0],
            &mut x,
            &mut self.randoms,
            &mut self.rng,
            &self.workers,
        );
        results.push(x);

        for i in 1..self.layers.len() {
            let mut z = eval_layer(&results[i - 1], &self.layers[i], &self.workers)?;
            mask_layer(
                &mut self.layers[i],
                &mut z,
                &mut self.randoms,
                &mut self.rng,
                &self.workers,
            );
            results.push(z);
        }

        let target = Matrix::from_vec(batch, self.output_size(), target.to_vec())?;

        let stale = self
            .backprop
            .as_ref()
            .map_or(true, |bp| bp.batch() != batch);
        if stale {
            debug!("allocating backprop scratch for batch size {batch}");
            self.backprop = Some(Backprop::new(&self.layers, batch));
        }
        let backprop = self
            .backprop
            .as_mut()
            .expect("backprop scratch was just initialized");

        let loss = backprop.apply(
            optimizer,
            &mut self.layers,
            &results,
            &target,
            eta,
            self.bias_policy,
            &self.workers,
        )?;
        trace!("train batch: {batch} examples, diagnostic loss {loss}");

        // Stochastic weight decay: a fraction of steps, not every step.
        if self.rng.gen::<f32>() < REGULARIZATION_PROBABILITY {
            for layer in &mut self.layers[1..] {
                let reg = layer.regularization();
                if let Some(weights) = layer.weights_mut() {
                    reg.apply(weights.data_mut(), eta);
                }
            }
        }

        let output = results
            .pop()
            .expect("forward pass produced an output matrix")
            .into_data();
        Ok(TrainReport { output, loss })
    }

    fn check_batch(&self, input: &[f32]) -> Result<usize> {
        let size = self.input_size();
        if input.is_empty() || input.len() % size != 0 {
            return Err(Error::InvalidData(format!(
                "input length {} is not a positive multiple of input size {size}",
                input.len()
            )));
        }
        Ok(input.len() / size)
    }
}

/// `activation(x · Wᵀ + 1 ⊗ bias)` for one layer.
///
/// The bias broadcast is an outer product of a ones column with the bias row
/// view, accumulated onto the product (`beta = 1`).
fn eval_layer(input: &Matrix, layer: &Layer, workers: &WorkerPool) -> Result<Matrix> {
    let weights = layer
        .weights()
        .expect("layers past the input anchor carry weights");
    let mut z = Matrix::zeros(input.rows(), layer.size());
    ops::product_concurrent(workers, input.view(), weights.t(), &mut z, 1.0, 0.0)?;

    let ones = vec![1.0_f32; input.rows()];
    ops::product(
        MatrixView::col_vector(&ones),
        MatrixView::row_vector(layer.bias()),
        &mut z,
        1.0,
        1.0,
    )?;

    layer.activation().apply_batch(&mut z);
    Ok(z)
}

/// Draw and apply a fresh dropout mask over the whole batch matrix,
/// recording the index set on the layer for the backward pass.
fn mask_layer(
    layer: &mut Layer,
    values: &mut Matrix,
    randoms: &mut RandomPool,
    rng: &mut StdRng,
    workers: &WorkerPool,
) {
    let dropout = layer.dropout();
    let mut mask = std::mem::take(&mut layer.mask);
    dropout.init_into(values.len(), &mut mask, randoms, rng, workers);
    dropout.apply(values.data_mut(), &mask);
    layer.mask = mask;
}

#[derive(Debug, Clone)]
struct LayerSpec {
    size: usize,
    activation: Activation,
    loss: Loss,
    dropout: Dropout,
    regularization: Regularization,
}

/// Builder for a [`Network`].
///
/// Example:
///
/// ```rust
/// use gradnet::{Activation, NetworkBuilder, Optimizer, Regularization};
///
/// # fn main() -> gradnet::Result<()> {
/// let mut network = NetworkBuilder::new(784)?
///     .add_layer(64, Activation::ReLU)?
///     .dropout(0.2)?
///     .add_layer(10, Activation::softmax())?
///     .regularization(Regularization::L1 { factor: 1e-5 })?
///     .build_with_seed(0)?;
///
/// let mut optimizer = Optimizer::adam().state()?;
/// # let (input, target) = (vec![0.0; 784 * 2], vec![0.0; 10 * 2]);
/// let report = network.train_batch(&mut optimizer, &input, &target, 1e-3)?;
/// # let _ = report;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    input_size: usize,
    input_dropout: Dropout,
    layers: Vec<LayerSpec>,
    bias_policy: BiasPolicy,
    threads: usize,
}

impl NetworkBuilder {
    /// Start a network accepting inputs of length `input_size`.
    pub fn new(input_size: usize) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::InvalidConfig("input size must be > 0".to_owned()));
        }
        Ok(Self {
            input_size,
            input_dropout: Dropout::none(),
            layers: Vec::new(),
            bias_policy: BiasPolicy::default(),
            threads: 1,
        })
    }

    /// Dropout applied to the raw input during training.
    pub fn input_dropout(mut self, rate: f32) -> Result<Self> {
        self.input_dropout = Dropout::new(rate)?;
        Ok(self)
    }

    /// Add a dense layer with `size` units.
    ///
    /// The layer's loss defaults to the activation's suggested pairing and
    /// can be overridden with [`NetworkBuilder::loss`].
    pub fn add_layer(mut self, size: usize, activation: Activation) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("layer size must be > 0".to_owned()));
        }
        activation.validate()?;
        self.layers.push(LayerSpec {
            size,
            activation,
            loss: activation.suggest_loss(),
            dropout: Dropout::none(),
            regularization: Regularization::None,
        });
        Ok(self)
    }

    /// Override the most recently added layer's loss.
    pub fn loss(mut self, loss: Loss) -> Result<Self> {
        loss.validate()?;
        self.last_layer()?.loss = loss;
        Ok(self)
    }

    /// Set the most recently added layer's dropout rate.
    pub fn dropout(mut self, rate: f32) -> Result<Self> {
        let dropout = Dropout::new(rate)?;
        self.last_layer()?.dropout = dropout;
        Ok(self)
    }

    /// Set the most recently added layer's regularization policy.
    pub fn regularization(mut self, regularization: Regularization) -> Result<Self> {
        regularization.validate()?;
        self.last_layer()?.regularization = regularization;
        Ok(self)
    }

    /// Choose how bias vectors are updated.
    pub fn bias_policy(mut self, policy: BiasPolicy) -> Result<Self> {
        if let BiasPolicy::FixedStep(step) = policy {
            if !(step.is_finite() && step >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "bias step must be finite and >= 0, got {step}"
                )));
            }
        }
        self.bias_policy = policy;
        Ok(self)
    }

    /// Size the worker pool used for parallel matrix products and random
    /// pool refills. One thread (the default) keeps everything sequential.
    pub fn max_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Build with a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(
                "network must have at least one dense layer".to_owned(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(Layer::input(self.input_size, self.input_dropout));

        let mut fan_in = self.input_size;
        for spec in self.layers {
            layers.push(Layer::dense(
                fan_in,
                spec.size,
                spec.activation,
                spec.loss,
                spec.dropout,
                spec.regularization,
                &mut rng,
            )?);
            fan_in = spec.size;
        }

        Ok(Network {
            layers,
            rng,
            randoms: RandomPool::new(),
            workers: WorkerPool::new(self.threads)?,
            backprop: None,
            bias_policy: self.bias_policy,
        })
    }

    fn last_layer(&mut self) -> Result<&mut LayerSpec> {
        self.layers.last_mut().ok_or_else(|| {
            Error::InvalidConfig("add a layer before configuring one".to_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Optimizer;

    #[test]
    fn builder_rejects_degenerate_configs() {
        assert!(NetworkBuilder::new(0).is_err());
        assert!(
            NetworkBuilder::new(4)
                .unwrap()
                .add_layer(0, Activation::ReLU)
                .is_err()
        );
        assert!(NetworkBuilder::new(4).unwrap().dropout(0.5).is_err());
        assert!(
            NetworkBuilder::new(4)
                .unwrap()
                .build_with_seed(0)
                .is_err()
        );
        assert!(
            NetworkBuilder::new(4)
                .unwrap()
                .add_layer(2, Activation::ReLU)
                .unwrap()
                .bias_policy(BiasPolicy::FixedStep(f32::NAN))
                .is_err()
        );
    }

    #[test]
    fn shape_chain_and_volume() {
        let network = NetworkBuilder::new(4)
            .unwrap()
            .add_layer(8, Activation::ReLU)
            .unwrap()
            .add_layer(3, Activation::softmax())
            .unwrap()
            .build_with_seed(0)
            .unwrap();

        assert_eq!(network.input_size(), 4);
        assert_eq!(network.output_size(), 3);
        assert_eq!(network.layer_count(), 3);
        assert_eq!(network.volume(), 4 * 8 + 8 * 3);

        let hidden = network.layer(1).unwrap();
        assert_eq!(hidden.fan_in(), 4);
        assert_eq!(hidden.size(), 8);
    }

    #[test]
    fn eval_batch_output_length_scales_with_batch() {
        let network = NetworkBuilder::new(5)
            .unwrap()
            .add_layer(6, Activation::ReLU)
            .unwrap()
            .add_layer(2, Activation::Linear)
            .unwrap()
            .build_with_seed(1)
            .unwrap();

        for k in [1_usize, 2, 3, 7] {
            let out = network.eval_batch(&vec![0.5; k * 5]).unwrap();
            assert_eq!(out.len(), k * 2);
        }
    }

    #[test]
    fn eval_batch_rejects_ragged_input() {
        let network = NetworkBuilder::new(4)
            .unwrap()
            .add_layer(2, Activation::Linear)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        assert!(network.eval_batch(&[0.0; 6]).is_err());
        assert!(network.eval_batch(&[]).is_err());
    }

    #[test]
    fn eval_is_deterministic_and_dropout_free() {
        let network = NetworkBuilder::new(4)
            .unwrap()
            .add_layer(8, Activation::ReLU)
            .unwrap()
            .dropout(0.5)
            .unwrap()
            .add_layer(2, Activation::Linear)
            .unwrap()
            .build_with_seed(3)
            .unwrap();

        let input = vec![0.3; 4];
        let a = network.eval_batch(&input).unwrap();
        let b = network.eval_batch(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn train_batch_validates_target_and_eta() {
        let mut network = NetworkBuilder::new(2)
            .unwrap()
            .add_layer(2, Activation::Linear)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        let mut opt = Optimizer::Sgd.state().unwrap();

        assert!(
            network
                .train_batch(&mut opt, &[0.0; 4], &[0.0; 3], 0.1)
                .is_err()
        );
        assert!(
            network
                .train_batch(&mut opt, &[0.0; 4], &[0.0; 4], -1.0)
                .is_err()
        );
        assert!(
            network
                .train_batch(&mut opt, &[0.0; 4], &[0.0; 4], 0.1)
                .is_ok()
        );
    }

    #[test]
    fn concurrent_network_evaluates_like_sequential() {
        let build = |threads| {
            NetworkBuilder::new(6)
                .unwrap()
                .add_layer(16, Activation::ReLU)
                .unwrap()
                .add_layer(4, Activation::softmax())
                .unwrap()
                .max_threads(threads)
                .build_with_seed(11)
                .unwrap()
        };
        let seq = build(1);
        let par = build(4);

        let input: Vec<f32> = (0..6 * 9).map(|i| (i as f32 * 0.37).sin()).collect();
        let a = seq.eval_batch(&input).unwrap();
        let b = par.eval_batch(&input).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
