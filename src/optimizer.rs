//! Gradient-descent optimizers.
//!
//! The variants differ only in the per-weight update rule; everything else
//! (lazy per-slot state, the `apply` contract) is shared:
//!
//! - configuration is an [`Optimizer`] value, validated up front
//! - accumulator state lives in an [`OptimizerState`] owned by the training
//!   loop, keyed by slot index (layer position), never inside the layer
//! - state is allocated on first use per slot and reallocated whenever the
//!   gradient length changes
//!
//! Every update loop walks the parameter arrays in fixed-width chunks
//! ([`LANES`] elements, sized to the host's data-parallel width) with a
//! scalar remainder loop for the tail.

use log::debug;

use crate::{Error, Result};

/// Chunk width of the vectorized update loops.
const LANES: usize = 8;
const EPS: f32 = 1e-10;
const ADAGRAD_EPS: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Optimizer {
    /// `w -= eta * g`.
    Sgd,
    /// `m = (1-beta)*g + beta*m; w -= eta * m`.
    Momentum { beta: f32 },
    /// Momentum with a look-ahead combination of the current gradient and
    /// the refreshed momentum.
    Nesterov { beta: f32 },
    /// Monotonically growing squared-gradient accumulator. Long runs can
    /// stall as the accumulator grows; that is inherent to the rule.
    AdaGrad,
    /// AdaGrad with an exponential moving average instead of a full sum.
    RmsProp { beta: f32 },
    /// Tracks both a gradient-squared and an update-squared accumulator so
    /// the step size adapts without an explicit schedule.
    AdaDelta { beta: f32 },
    /// Bias-corrected first/second moment estimates.
    Adam { beta1: f32, beta2: f32 },
}

impl Optimizer {
    /// Momentum with the conventional 0.9 coefficient.
    pub fn momentum() -> Self {
        Optimizer::Momentum { beta: 0.9 }
    }

    /// RMSProp with the conventional 0.9 decay.
    pub fn rmsprop() -> Self {
        Optimizer::RmsProp { beta: 0.9 }
    }

    /// Adam with the conventional (0.9, 0.999) coefficients.
    pub fn adam() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd | Optimizer::AdaGrad => Ok(()),
            Optimizer::Momentum { beta }
            | Optimizer::Nesterov { beta }
            | Optimizer::RmsProp { beta }
            | Optimizer::AdaDelta { beta } => check_beta(beta, "beta"),
            Optimizer::Adam { beta1, beta2 } => {
                check_beta(beta1, "beta1")?;
                check_beta(beta2, "beta2")
            }
        }
    }

    /// Allocate an empty state for this configuration.
    pub fn state(self) -> Result<OptimizerState> {
        self.validate()?;
        Ok(OptimizerState {
            config: self,
            slots: Vec::new(),
        })
    }
}

fn check_beta(beta: f32, name: &str) -> Result<()> {
    if !(beta.is_finite() && (0.0..1.0).contains(&beta)) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and in [0, 1), got {beta}"
        )));
    }
    Ok(())
}

/// Owned accumulator state for one optimizer configuration.
///
/// Must not be shared between two networks training concurrently; each
/// network owns its slots.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    config: Optimizer,
    slots: Vec<Option<Slot>>,
}

#[derive(Debug, Clone)]
struct Slot {
    len: usize,
    /// Momentum / squared-gradient accumulator, depending on the rule.
    first: Vec<f32>,
    /// Second accumulator: Adam's `v`, AdaDelta's update-squared `D`.
    second: Vec<f32>,
    beta1_pow: f32,
    beta2_pow: f32,
}

impl Slot {
    fn new(config: Optimizer, len: usize) -> Self {
        let (first, second) = match config {
            Optimizer::Sgd => (Vec::new(), Vec::new()),
            Optimizer::Momentum { .. }
            | Optimizer::Nesterov { .. }
            | Optimizer::AdaGrad
            | Optimizer::RmsProp { .. } => (vec![0.0; len], Vec::new()),
            // AdaDelta's update accumulator starts at one so the very first
            // steps are not collapsed to zero.
            Optimizer::AdaDelta { .. } => (vec![0.0; len], vec![1.0; len]),
            Optimizer::Adam { .. } => (vec![0.0; len], vec![0.0; len]),
        };
        Self {
            len,
            first,
            second,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
        }
    }
}

impl OptimizerState {
    #[inline]
    pub fn config(&self) -> Optimizer {
        self.config
    }

    /// Apply one update: mutate `weights` in place given a freshly computed
    /// `gradient` of the same length.
    ///
    /// `slot` keys the accumulator state (layer index, or a distinct slot
    /// for a bias vector). State is created lazily and reinitialized if the
    /// parameter length changed since the last call.
    pub fn apply(&mut self, slot: usize, weights: &mut [f32], gradient: &[f32], eta: f32) {
        assert_eq!(
            weights.len(),
            gradient.len(),
            "gradient length {} does not match parameter length {}",
            gradient.len(),
            weights.len()
        );
        assert!(eta.is_finite() && eta > 0.0, "eta must be finite and > 0");
        if weights.is_empty() {
            return;
        }

        let config = self.config;
        if let Optimizer::Sgd = config {
            sgd(weights, gradient, eta);
            return;
        }

        let state = self.slot(slot, weights.len());
        match config {
            Optimizer::Momentum { beta } => {
                momentum(weights, gradient, &mut state.first, beta, eta);
            }
            Optimizer::Nesterov { beta } => {
                nesterov(weights, gradient, &mut state.first, beta, eta);
            }
            Optimizer::AdaGrad => adagrad(weights, gradient, &mut state.first, eta),
            Optimizer::RmsProp { beta } => {
                rmsprop(weights, gradient, &mut state.first, beta, eta);
            }
            Optimizer::AdaDelta { beta } => {
                adadelta(
                    weights,
                    gradient,
                    &mut state.first,
                    &mut state.second,
                    beta,
                    eta,
                );
            }
            Optimizer::Adam { beta1, beta2 } => {
                state.beta1_pow *= beta1;
                state.beta2_pow *= beta2;
                let corr1 = 1.0 - state.beta1_pow;
                let corr2 = 1.0 - state.beta2_pow;
                adam(
                    weights,
                    gradient,
                    &mut state.first,
                    &mut state.second,
                    beta1,
                    beta2,
                    corr1,
                    corr2,
                    eta,
                );
            }
            Optimizer::Sgd => unreachable!("handled above"),
        }
    }

    fn slot(&mut self, index: usize, len: usize) -> &mut Slot {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        let stale = match &self.slots[index] {
            Some(slot) => slot.len != len,
            None => true,
        };
        if stale {
            debug!("allocating optimizer state for slot {index} ({len} parameters)");
            self.slots[index] = Some(Slot::new(self.config, len));
        }
        self.slots[index]
            .as_mut()
            .expect("slot was just initialized")
    }
}

fn sgd(w: &mut [f32], g: &[f32], eta: f32) {
    let split = w.len() - w.len() % LANES;
    for (wc, gc) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
    {
        for l in 0..LANES {
            wc[l] -= eta * gc[l];
        }
    }
    for i in split..w.len() {
        w[i] -= eta * g[i];
    }
}

fn momentum(w: &mut [f32], g: &[f32], m: &mut [f32], beta: f32, eta: f32) {
    let split = w.len() - w.len() % LANES;
    for ((wc, gc), mc) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(m[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            mc[l] = (1.0 - beta).mul_add(gc[l], beta * mc[l]);
            wc[l] -= eta * mc[l];
        }
    }
    for i in split..w.len() {
        m[i] = (1.0 - beta).mul_add(g[i], beta * m[i]);
        w[i] -= eta * m[i];
    }
}

fn nesterov(w: &mut [f32], g: &[f32], m: &mut [f32], beta: f32, eta: f32) {
    let split = w.len() - w.len() % LANES;
    for ((wc, gc), mc) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(m[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            mc[l] = (1.0 - beta).mul_add(gc[l], beta * mc[l]);
            wc[l] -= eta * (1.0 - beta).mul_add(gc[l], beta * mc[l]);
        }
    }
    for i in split..w.len() {
        m[i] = (1.0 - beta).mul_add(g[i], beta * m[i]);
        w[i] -= eta * (1.0 - beta).mul_add(g[i], beta * m[i]);
    }
}

fn adagrad(w: &mut [f32], g: &[f32], acc: &mut [f32], eta: f32) {
    let split = w.len() - w.len() % LANES;
    for ((wc, gc), ac) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(acc[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            ac[l] = gc[l].mul_add(gc[l], ac[l]);
            wc[l] -= eta * gc[l] / (ac[l] + ADAGRAD_EPS).sqrt();
        }
    }
    for i in split..w.len() {
        acc[i] = g[i].mul_add(g[i], acc[i]);
        w[i] -= eta * g[i] / (acc[i] + ADAGRAD_EPS).sqrt();
    }
}

fn rmsprop(w: &mut [f32], g: &[f32], acc: &mut [f32], beta: f32, eta: f32) {
    let split = w.len() - w.len() % LANES;
    for ((wc, gc), ac) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(acc[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            ac[l] = (1.0 - beta).mul_add(gc[l] * gc[l], beta * ac[l]);
            wc[l] -= eta * gc[l] / (ac[l] + EPS).sqrt();
        }
    }
    for i in split..w.len() {
        acc[i] = (1.0 - beta).mul_add(g[i] * g[i], beta * acc[i]);
        w[i] -= eta * g[i] / (acc[i] + EPS).sqrt();
    }
}

fn adadelta(w: &mut [f32], g: &[f32], acc: &mut [f32], upd: &mut [f32], beta: f32, eta: f32) {
    let split = w.len() - w.len() % LANES;
    for (((wc, gc), ac), dc) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(acc[..split].chunks_exact_mut(LANES))
        .zip(upd[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            ac[l] = (1.0 - beta).mul_add(gc[l] * gc[l], beta * ac[l]);
            let delta = gc[l] * (dc[l] + EPS).sqrt() / (ac[l] + EPS).sqrt();
            wc[l] -= eta * delta;
            dc[l] = (1.0 - beta).mul_add(delta * delta, beta * dc[l]);
        }
    }
    for i in split..w.len() {
        acc[i] = (1.0 - beta).mul_add(g[i] * g[i], beta * acc[i]);
        let delta = g[i] * (upd[i] + EPS).sqrt() / (acc[i] + EPS).sqrt();
        w[i] -= eta * delta;
        upd[i] = (1.0 - beta).mul_add(delta * delta, beta * upd[i]);
    }
}

#[allow(clippy::too_many_arguments)]
fn adam(
    w: &mut [f32],
    g: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    beta1: f32,
    beta2: f32,
    corr1: f32,
    corr2: f32,
    eta: f32,
) {
    let split = w.len() - w.len() % LANES;
    for (((wc, gc), mc), vc) in w[..split]
        .chunks_exact_mut(LANES)
        .zip(g[..split].chunks_exact(LANES))
        .zip(m[..split].chunks_exact_mut(LANES))
        .zip(v[..split].chunks_exact_mut(LANES))
    {
        for l in 0..LANES {
            mc[l] = (1.0 - beta1).mul_add(gc[l], beta1 * mc[l]);
            vc[l] = (1.0 - beta2).mul_add(gc[l] * gc[l], beta2 * vc[l]);
            let m_hat = mc[l] / corr1;
            let v_hat = vc[l] / corr2;
            wc[l] -= eta * m_hat / (v_hat.sqrt() + EPS);
        }
    }
    for i in split..w.len() {
        m[i] = (1.0 - beta1).mul_add(g[i], beta1 * m[i]);
        v[i] = (1.0 - beta2).mul_add(g[i] * g[i], beta2 * v[i]);
        let m_hat = m[i] / corr1;
        let v_hat = v[i] / corr2;
        w[i] -= eta * m_hat / (v_hat.sqrt() + EPS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_out_of_range_betas() {
        assert!(Optimizer::Momentum { beta: 1.0 }.validate().is_err());
        assert!(Optimizer::RmsProp { beta: -0.1 }.validate().is_err());
        assert!(
            Optimizer::Adam {
                beta1: f32::NAN,
                beta2: 0.999
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::adam().validate().is_ok());
        assert!(Optimizer::AdaGrad.validate().is_ok());
    }

    #[test]
    fn sgd_applies_the_plain_rule_including_the_tail() {
        // 11 elements: one full chunk of 8 plus a remainder of 3.
        let mut w = vec![1.0_f32; 11];
        let g = vec![0.5_f32; 11];
        let mut opt = Optimizer::Sgd.state().unwrap();
        opt.apply(0, &mut w, &g, 0.1);
        for v in w {
            assert!((v - 0.95).abs() < 1e-6);
        }
    }

    #[test]
    fn momentum_first_step_scales_the_gradient_by_one_minus_beta() {
        let mut w = vec![1.0_f32; 4];
        let g = vec![1.0_f32; 4];
        let mut opt = Optimizer::Momentum { beta: 0.9 }.state().unwrap();
        opt.apply(0, &mut w, &g, 1.0);
        for v in w {
            assert!((v - 0.9).abs() < 1e-6);
        }
    }

    #[test]
    fn adam_first_step_is_close_to_eta_for_unit_gradient() {
        let mut w = vec![1.0_f32; 3];
        let g = vec![1.0_f32; 3];
        let mut opt = Optimizer::adam().state().unwrap();
        opt.apply(0, &mut w, &g, 0.1);
        // Bias correction makes m_hat = g and v_hat = g^2 on step one, so
        // the update is ~eta.
        for v in w {
            assert!((v - 0.9).abs() < 1e-4, "got {v}");
        }
    }

    #[test]
    fn adagrad_accumulator_slows_repeated_updates() {
        let mut w = vec![0.0_f32; 1];
        let g = vec![1.0_f32; 1];
        let mut opt = Optimizer::AdaGrad.state().unwrap();

        opt.apply(0, &mut w, &g, 0.1);
        let first_step = -w[0];
        let before = w[0];
        opt.apply(0, &mut w, &g, 0.1);
        let second_step = before - w[0];
        assert!(second_step < first_step, "{second_step} vs {first_step}");
    }

    #[test]
    fn state_reinitializes_on_length_change() {
        let mut opt = Optimizer::rmsprop().state().unwrap();
        let mut w4 = vec![1.0_f32; 4];
        opt.apply(0, &mut w4, &[0.1; 4], 0.1);
        // Same slot, different shape: must not panic or mix accumulators.
        let mut w6 = vec![1.0_f32; 6];
        opt.apply(0, &mut w6, &[0.1; 6], 0.1);
        assert!(w6.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn slots_are_independent() {
        let mut opt = Optimizer::momentum().state().unwrap();
        let mut w0 = vec![1.0_f32; 2];
        let mut w1 = vec![1.0_f32; 2];
        opt.apply(0, &mut w0, &[1.0; 2], 0.1);
        opt.apply(0, &mut w0, &[1.0; 2], 0.1);
        // Slot 1 sees a fresh accumulator: its first step matches w0's first.
        opt.apply(1, &mut w1, &[1.0; 2], 0.1);
        assert!((w1[0] - (1.0 - 0.1 * 0.1)).abs() < 1e-6);
    }

    #[test]
    fn every_rule_moves_weights_against_the_gradient() {
        for config in [
            Optimizer::Sgd,
            Optimizer::momentum(),
            Optimizer::Nesterov { beta: 0.7 },
            Optimizer::AdaGrad,
            Optimizer::rmsprop(),
            Optimizer::AdaDelta { beta: 0.9 },
            Optimizer::adam(),
        ] {
            let mut w = vec![1.0_f32; 9];
            let g = vec![2.0_f32; 9];
            let mut opt = config.state().unwrap();
            opt.apply(0, &mut w, &g, 0.01);
            assert!(
                w.iter().all(|&v| v < 1.0),
                "{config:?} failed to step downhill"
            );
        }
    }
}
