//! A batched feed-forward training engine.
//!
//! `gradnet` is the reusable numerical core for training dense
//! classification networks: a flat row-major matrix abstraction with
//! copy-free transposed views, GEMM-backed linear algebra with an optional
//! worker-pool parallel path, batched backpropagation, and a family of
//! pluggable gradient-descent optimizers.
//!
//! # Design goals
//!
//! - Predictable performance: scratch buffers and optimizer accumulators are
//!   allocated lazily and reused across steps.
//! - Clear contracts: shapes are explicit and validated at the API boundary.
//! - Swappable strategies: activations, losses, dropout, regularization, and
//!   optimizers are flat enums of interchangeable variants.
//!
//! # Panics vs `Result`
//!
//! This crate intentionally exposes two layers of API:
//!
//! - Low-level hot-path kernels ([`ops::hadamard`], [`ops::axpy`],
//!   activation `diff_batch`) treat shape mismatches as programmer error and
//!   panic via `assert!`.
//! - Boundary APIs ([`Network::eval_batch`], [`Network::train_batch`],
//!   [`NetworkBuilder`], [`ops::product`]) validate inputs and return
//!   [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - Batches are flat row-major buffers: `k` examples of `input_size` values
//!   in, `k` rows of `output_size` values out, in the same order.
//! - Layer weights are row-major with shape `(size, fan_in)`; transposition
//!   is a stride-aware view, never a copy.
//!
//! # Quick start
//!
//! ```rust
//! use gradnet::{Activation, NetworkBuilder, Optimizer};
//!
//! # fn main() -> gradnet::Result<()> {
//! let mut network = NetworkBuilder::new(4)?
//!     .add_layer(16, Activation::ReLU)?
//!     .add_layer(3, Activation::softmax())?
//!     .build_with_seed(0)?;
//!
//! let mut optimizer = Optimizer::adam().state()?;
//!
//! // Two examples per batch, one-hot targets.
//! let input = vec![0.1, 0.9, 0.2, 0.8, 0.7, 0.1, 0.3, 0.2];
//! let target = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
//!
//! for _ in 0..100 {
//!     network.train_batch(&mut optimizer, &input, &target, 1e-2)?;
//! }
//! let probabilities = network.eval_batch(&input)?;
//! assert_eq!(probabilities.len(), 2 * 3);
//! # Ok(())
//! # }
//! ```

pub mod activation;
mod backprop;
pub mod dropout;
pub mod error;
pub mod layer;
pub mod loss;
pub mod matrix;
pub mod network;
pub mod ops;
pub mod optimizer;
pub mod pool;
pub mod rand_pool;
pub mod regularization;

pub use activation::Activation;
pub use dropout::Dropout;
pub use error::{Error, Result};
pub use layer::Layer;
pub use loss::Loss;
pub use matrix::{transpose_vector, Matrix, MatrixView};
pub use network::{BiasPolicy, Network, NetworkBuilder, TrainReport};
pub use optimizer::{Optimizer, OptimizerState};
pub use pool::WorkerPool;
pub use rand_pool::RandomPool;
pub use regularization::Regularization;
