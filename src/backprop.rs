//! Batched backpropagation.
//!
//! Walks the layer list backward from the output, computing per-layer error
//! signals, elementwise error x derivative gradients, and weight gradients,
//! then hands each layer's fresh gradient to the optimizer. All buffers are
//! owned here and sized by batch; the network reallocates this scratch only
//! when the batch size changes.
//!
//! Weights are stored `(size, fan_in)` row-major, the transposed view of
//! the forward orientation, so the backward error product runs against the
//! stored orientation directly and the weight gradient `gradientᵀ · input`
//! lands element-aligned with the weight buffer.

use rayon::prelude::*;

use crate::layer::Layer;
use crate::matrix::Matrix;
use crate::network::BiasPolicy;
use crate::optimizer::OptimizerState;
use crate::pool::WorkerPool;
use crate::{ops, Activation, Loss, Result};

#[derive(Debug)]
pub(crate) struct Backprop {
    items: Vec<Item>,
    batch: usize,
}

#[derive(Debug)]
struct Item {
    /// Activation derivative at the stored layer values, dropout-masked.
    diff: Matrix,
    /// Error signal propagated backward from the output.
    error: Matrix,
    /// `error ⊙ diff` (or the raw error for the fused softmax output).
    gradient: Matrix,
    /// `gradientᵀ · layer input`, same shape as the weight matrix.
    weight_grad: Matrix,
    /// Column means of `gradient`.
    bias_grad: Vec<f32>,
}

impl Backprop {
    pub(crate) fn new(layers: &[Layer], batch: usize) -> Self {
        let items = layers
            .iter()
            .map(|layer| {
                let (w_rows, w_cols) = layer
                    .weights()
                    .map_or((0, 0), |w| (w.rows(), w.cols()));
                Item {
                    diff: Matrix::zeros(batch, layer.size()),
                    error: Matrix::zeros(batch, layer.size()),
                    gradient: Matrix::zeros(batch, layer.size()),
                    weight_grad: Matrix::zeros(w_rows, w_cols),
                    bias_grad: vec![0.0; if w_rows > 0 { layer.size() } else { 0 }],
                }
            })
            .collect();
        Self { items, batch }
    }

    pub(crate) fn batch(&self) -> usize {
        self.batch
    }

    /// One full backward pass plus parameter updates.
    ///
    /// `results[0]` is the (dropout-masked) input batch; `results[i]` is
    /// layer `i`'s stored post-activation output. Returns the summed
    /// diagnostic loss.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply(
        &mut self,
        optimizer: &mut OptimizerState,
        layers: &mut [Layer],
        results: &[Matrix],
        target: &Matrix,
        eta: f32,
        bias_policy: BiasPolicy,
        workers: &WorkerPool,
    ) -> Result<f32> {
        debug_assert_eq!(layers.len(), results.len());
        debug_assert_eq!(layers.len(), self.items.len());

        let count = layers.len();
        let out = count - 1;

        // Output layer: derivative, replayed dropout mask, error = y - t.
        {
            let item = &mut self.items[out];
            let layer = &layers[out];
            layer.activation().diff_batch(&results[out], &mut item.diff);
            layer.dropout().apply(item.diff.data_mut(), &layer.mask);

            item.error.data_mut().copy_from_slice(results[out].data());
            ops::axpy(target.data(), item.error.data_mut(), -1.0);
        }

        // Hidden layers, last to first. Each error depends on the next
        // layer's fully computed error, so this chain stays sequential.
        for i in (1..out).rev() {
            let (current, next) = self.items.split_at_mut(i + 1);
            let item = &mut current[i];
            let layer = &layers[i];

            layer.activation().diff_batch(&results[i], &mut item.diff);
            layer.dropout().apply(item.diff.data_mut(), &layer.mask);

            let w_next = layers[i + 1]
                .weights()
                .expect("layers past the input anchor carry weights");
            ops::product(next[0].error.view(), w_next.view(), &mut item.error, 1.0, 0.0)?;
        }

        // Gradients are independent across layers once the errors exist.
        let fused_output = fused_softmax_cross_entropy(&layers[out]);
        workers.install(|| {
            self.items[1..]
                .par_iter_mut()
                .enumerate()
                .for_each(|(k, item)| {
                    if k + 1 == out && fused_output {
                        item.gradient.data_mut().copy_from_slice(item.error.data());
                    } else {
                        ops::hadamard(
                            item.error.data(),
                            item.diff.data(),
                            item.gradient.data_mut(),
                            1.0,
                            0.0,
                        );
                    }
                });
        });

        // Weight and bias updates, layer by layer.
        for i in 1..count {
            let item = &mut self.items[i];
            let layer = &mut layers[i];
            let rate = layer.dropout().scale();

            ops::product(
                item.gradient.t(),
                results[i - 1].view(),
                &mut item.weight_grad,
                1.0,
                0.0,
            )?;
            let weights = layer
                .weights_mut()
                .expect("layers past the input anchor carry weights");
            optimizer.apply(i, weights.data_mut(), item.weight_grad.data(), eta * rate);

            ops::col_mean(item.gradient.view(), &mut item.bias_grad);
            match bias_policy {
                BiasPolicy::FixedStep(step) => {
                    if step > 0.0 {
                        ops::axpy(&item.bias_grad, layer.bias_mut(), -step);
                    }
                }
                BiasPolicy::Optimizer => {
                    optimizer.apply(count + i, layer.bias_mut(), &item.bias_grad, eta * rate);
                }
            }
        }

        // Diagnostic loss: each layer's loss over its own gradient target.
        let mut total = 0.0;
        for i in 1..count {
            total += layers[i]
                .loss()
                .apply(self.items[i].gradient.data(), results[i].data());
        }
        Ok(total)
    }
}

fn fused_softmax_cross_entropy(layer: &Layer) -> bool {
    matches!(layer.activation(), Activation::Softmax { .. })
        && matches!(layer.loss(), Loss::CrossEntropy)
}
