//! Optimizers: SGD, Momentum, Adam. Each consumes the trainable
//! [`Variable`]s of a model and steps their tensors from their
//! already-accumulated gradients, then zeroes those gradients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{Float, Tensor};
use crate::variable::Variable;

#[derive(Error, Debug)]
#[error("optimizer error: {0}")]
pub struct OptimizerError(pub String);

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// An optimizer consumes the current batch's trainable variables (those
/// with `requires_grad()`) and updates their tensors in place. `batch_size`
/// divides the accumulated gradient before the update, matching the
/// convention that backward passes accumulate a *sum* of per-example
/// gradients rather than a mean.
pub trait Optimizer {
    fn step(&mut self, variables: &[&Variable], batch_size: usize) -> OptimizerResult<()>;

    /// Overwrite the learning rate, e.g. for a `Trainer`'s piecewise
    /// schedule; leaves momentum/moment state untouched.
    fn set_lr(&mut self, lr: Float);

    /// Zero every variable's gradient; call after `step`.
    fn zero_grad(&self, variables: &[&Variable]) {
        for v in variables {
            v.zero_grad();
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: Float,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig { lr: 0.01 }
    }
}

/// Plain gradient descent: `param -= lr * grad / batch_size`.
pub struct Sgd {
    pub config: SgdConfig,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        Sgd { config }
    }
}

impl Optimizer for Sgd {
    fn set_lr(&mut self, lr: Float) {
        self.config.lr = lr;
    }

    fn step(&mut self, variables: &[&Variable], batch_size: usize) -> OptimizerResult<()> {
        let scale = 1.0 / batch_size.max(1) as Float;
        for var in variables {
            if !var.requires_grad() {
                continue;
            }
            let grad = var.grad.as_ref().expect("requires_grad implies a grad slot");
            if grad.size() != var.tensor.size() {
                return Err(OptimizerError("param and grad size mismatch".into()));
            }
            for i in 0..var.tensor.size() {
                let g = grad.get_unchecked(i) * scale;
                let p = var.tensor.get_unchecked(i) - self.config.lr * g;
                var.tensor.set_unchecked(i, p);
            }
            var.tensor.wrap_for_broadcasting();
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MomentumConfig {
    pub lr: Float,
    pub momentum: Float,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        MomentumConfig { lr: 0.01, momentum: 0.9 }
    }
}

/// Classical momentum: `v = momentum * v + grad/batch_size; param -= lr * v`.
/// Velocity state is keyed by position in the `variables` slice passed to
/// `step`, so callers must pass the same variables in the same order every
/// step.
pub struct Momentum {
    pub config: MomentumConfig,
    velocity: Vec<Tensor>,
}

impl Momentum {
    pub fn new(config: MomentumConfig) -> Self {
        Momentum { config, velocity: Vec::new() }
    }
}

impl Optimizer for Momentum {
    fn set_lr(&mut self, lr: Float) {
        self.config.lr = lr;
    }

    fn step(&mut self, variables: &[&Variable], batch_size: usize) -> OptimizerResult<()> {
        let scale = 1.0 / batch_size.max(1) as Float;
        while self.velocity.len() < variables.len() {
            let idx = self.velocity.len();
            self.velocity.push(Tensor::zeros(variables[idx].tensor.shape().clone()));
        }
        for (i, var) in variables.iter().enumerate() {
            if !var.requires_grad() {
                continue;
            }
            let grad = var.grad.as_ref().expect("requires_grad implies a grad slot");
            if grad.size() != var.tensor.size() {
                return Err(OptimizerError("param and grad size mismatch".into()));
            }
            let v = &self.velocity[i];
            for j in 0..var.tensor.size() {
                let g = grad.get_unchecked(j) * scale;
                let v_j = self.config.momentum * v.get_unchecked(j) + (1.0 - self.config.momentum) * g;
                v.set_unchecked(j, v_j);
                let p = var.tensor.get_unchecked(j) - self.config.lr * v_j;
                var.tensor.set_unchecked(j, p);
            }
            v.wrap_for_broadcasting();
            var.tensor.wrap_for_broadcasting();
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AdamConfig {
    pub lr: Float,
    pub beta1: Float,
    pub beta2: Float,
    pub eps: Float,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig { lr: 0.001, beta1: 0.9, beta2: 0.999, eps: 1e-8 }
    }
}

/// Adam: bias-corrected first and second raw moment estimates. State is
/// keyed by position in the `variables` slice, as with [`Momentum`].
pub struct Adam {
    pub config: AdamConfig,
    state: Vec<(Tensor, Tensor)>,
    t: u32,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Adam { config, state: Vec::new(), t: 0 }
    }
}

impl Optimizer for Adam {
    fn set_lr(&mut self, lr: Float) {
        self.config.lr = lr;
    }

    fn step(&mut self, variables: &[&Variable], batch_size: usize) -> OptimizerResult<()> {
        let scale = 1.0 / batch_size.max(1) as Float;
        self.t += 1;
        let beta1_t = self.config.beta1.powi(self.t as i32);
        let beta2_t = self.config.beta2.powi(self.t as i32);
        let m_hat_scale = 1.0 / (1.0 - beta1_t);
        let v_hat_scale = 1.0 / (1.0 - beta2_t);

        while self.state.len() < variables.len() {
            let idx = self.state.len();
            let shape = variables[idx].tensor.shape().clone();
            self.state.push((Tensor::zeros(shape.clone()), Tensor::zeros(shape)));
        }

        for (i, var) in variables.iter().enumerate() {
            if !var.requires_grad() {
                continue;
            }
            let grad = var.grad.as_ref().expect("requires_grad implies a grad slot");
            if grad.size() != var.tensor.size() {
                return Err(OptimizerError("param and grad size mismatch".into()));
            }
            let (m, v) = &self.state[i];
            for j in 0..var.tensor.size() {
                let g = grad.get_unchecked(j) * scale;
                let m_j = self.config.beta1 * m.get_unchecked(j) + (1.0 - self.config.beta1) * g;
                let v_j = self.config.beta2 * v.get_unchecked(j) + (1.0 - self.config.beta2) * g * g;
                m.set_unchecked(j, m_j);
                v.set_unchecked(j, v_j);

                let m_hat = m_j * m_hat_scale;
                let v_hat = v_j * v_hat_scale;
                let p = var.tensor.get_unchecked(j) - self.config.lr * m_hat / (v_hat.sqrt() + self.config.eps);
                var.tensor.set_unchecked(j, p);
            }
            m.wrap_for_broadcasting();
            v.wrap_for_broadcasting();
            var.tensor.wrap_for_broadcasting();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn sgd_step_moves_against_gradient() {
        let w = Variable::trainable(Shape::new(vec![2]).unwrap());
        w.tensor.set_constant(1.0);
        w.grad.as_ref().unwrap().set_constant(2.0);

        let mut opt = Sgd::new(SgdConfig { lr: 0.1 });
        opt.step(&[&w], 1).unwrap();
        assert_eq!(w.tensor.get_unchecked(0), 0.8);

        opt.zero_grad(&[&w]);
        assert_eq!(w.grad.as_ref().unwrap().get_unchecked(0), 0.0);
    }

    #[test]
    fn sgd_normalizes_by_batch_size() {
        let w = Variable::trainable(Shape::scalar());
        w.tensor.set_constant(1.0);
        w.grad.as_ref().unwrap().set_constant(4.0);

        let mut opt = Sgd::new(SgdConfig { lr: 1.0 });
        opt.step(&[&w], 4).unwrap();
        assert_eq!(w.tensor.get_unchecked(0), 0.0);
    }

    #[test]
    fn adam_first_step_moves_toward_negative_gradient_sign() {
        let w = Variable::trainable(Shape::scalar());
        w.tensor.set_constant(1.0);
        w.grad.as_ref().unwrap().set_constant(1.0);

        let mut opt = Adam::new(AdamConfig::default());
        opt.step(&[&w], 1).unwrap();
        assert!(w.tensor.get_unchecked(0) < 1.0);
    }

    #[test]
    fn frozen_variable_is_untouched() {
        let w = Variable::constant(Tensor::from_vec(Shape::scalar(), vec![5.0]).unwrap());
        let mut opt = Sgd::new(SgdConfig::default());
        opt.step(&[&w], 1).unwrap();
        assert_eq!(w.tensor.get_unchecked(0), 5.0);
    }
}
