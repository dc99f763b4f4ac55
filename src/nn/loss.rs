//! Loss functions. Both are fused forward+backward computed outside the
//! expression graph rather than as graph nodes — the instruction alphabet
//! has no reduce-to-scalar opcode, so a mean/sum-of-squares loss is
//! computed directly over the forward result and its gradient is seeded
//! straight into the root via [`crate::autograd::Forward::backward`].

use crate::autograd::{self, Forward};
use crate::expr::ExprNode;
use crate::shape::Shape;
use crate::tensor::{Float, Tensor};

/// Mean squared error: `mean((pred - target)^2)`.
pub struct Mse<'a> {
    fwd: Forward<'a>,
    diff: Tensor,
    pub loss: Float,
}

impl<'a> Mse<'a> {
    /// Run the forward pass of `expr` and compute the loss against `target`
    /// (same shape as the expression's result).
    pub fn new(expr: &'a ExprNode, target: &Tensor) -> Self {
        let fwd = autograd::forward(expr);
        let pred = &fwd.result;
        assert_eq!(pred.size(), target.size(), "mse: pred/target size mismatch");

        let diff = Tensor::zeros(pred.shape().clone());
        let mut sq_sum = 0.0;
        for i in 0..pred.size() {
            let d = pred.get_unchecked(i) - target.get_unchecked(i);
            diff.set_unchecked(i, d);
            sq_sum += d * d;
        }
        diff.wrap_for_broadcasting();
        let loss = sq_sum / pred.size() as Float;
        Mse { fwd, diff, loss }
    }

    /// Seed the root gradient with `2 * diff / n` and run the reverse sweep.
    pub fn backward(&self) {
        let n = self.diff.size() as Float;
        let grad = Tensor::zeros(self.diff.shape().clone());
        for i in 0..self.diff.size() {
            grad.set_unchecked(i, 2.0 * self.diff.get_unchecked(i) / n);
        }
        grad.wrap_for_broadcasting();
        tracing::debug!(loss = self.loss, "mse backward");
        self.fwd.backward(grad);
    }
}

/// Softmax cross-entropy for multi-class classification: forward computes
/// per-row-stable softmax probabilities and the mean negative log
/// likelihood; backward seeds the root gradient with `probs - one_hot(targets)`.
pub struct SoftmaxCrossEntropy<'a> {
    fwd: Forward<'a>,
    pub probs: Tensor,
    pub predictions: Vec<usize>,
    pub loss: Float,
    rows: usize,
    classes: usize,
}

impl<'a> SoftmaxCrossEntropy<'a> {
    /// Run the forward pass of `expr` (logits, shape `[rows, classes]` or
    /// `[classes]` for a single row) and compute probabilities, per-row
    /// argmax predictions, and the mean NLL loss against `targets`.
    pub fn new(expr: &'a ExprNode, targets: &[usize]) -> Self {
        let fwd = autograd::forward(expr);
        let logits = &fwd.result;
        let dims = logits.shape().dims();
        let (rows, classes) = if dims.len() >= 2 { (dims[0], logits.size() / dims[0]) } else { (1, dims[0]) };
        assert_eq!(rows, targets.len(), "softmax cross-entropy: one target per row");

        let probs = Tensor::zeros(logits.shape().clone());
        let mut predictions = Vec::with_capacity(rows);
        let mut nll_sum = 0.0;
        for r in 0..rows {
            let row = |c: usize| logits.get_unchecked(r * classes + c);
            let mut max = row(0);
            let mut argmax = 0;
            for c in 1..classes {
                let v = row(c);
                if v > max {
                    max = v;
                    argmax = c;
                }
            }
            predictions.push(argmax);

            let mut sum_exp = 0.0;
            let mut exps = vec![0.0; classes];
            for c in 0..classes {
                let e = (row(c) - max).exp();
                exps[c] = e;
                sum_exp += e;
            }
            for c in 0..classes {
                probs.set_unchecked(r * classes + c, exps[c] / sum_exp);
            }
            nll_sum += -(probs.get_unchecked(r * classes + targets[r]).ln());
        }
        probs.wrap_for_broadcasting();
        let loss = nll_sum / rows as Float;

        SoftmaxCrossEntropy { fwd, probs, predictions, loss, rows, classes }
    }

    /// Seed the root gradient with `probs - one_hot(targets)` and run the
    /// reverse sweep.
    pub fn backward(&self, targets: &[usize]) {
        let grad = self.probs.deep_clone();
        for r in 0..self.rows {
            let idx = r * self.classes + targets[r];
            let v = grad.get_unchecked(idx) - 1.0;
            grad.set_unchecked(idx, v);
        }
        grad.wrap_for_broadcasting();
        tracing::debug!(loss = self.loss, "softmax cross-entropy backward");
        self.fwd.backward(grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    #[test]
    fn softmax_cross_entropy_matches_worked_scenario() {
        let logits = Variable::constant(Tensor::from_vec(Shape::new(vec![3]).unwrap(), vec![1.0, 2.0, 3.0]).unwrap());
        let expr = ExprNode::leaf(logits);
        let ce = SoftmaxCrossEntropy::new(&expr, &[2]);
        assert_eq!(ce.predictions[0], 2);
        assert!((ce.loss - 0.4076).abs() < 1e-3);

        let mut sum = 0.0;
        for c in 0..3 {
            sum += ce.probs.get_unchecked(c);
        }
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mse_zero_when_pred_equals_target() {
        let pred = Variable::constant(Tensor::from_vec(Shape::new(vec![3]).unwrap(), vec![1.0, 2.0, 3.0]).unwrap());
        let target = Tensor::from_vec(Shape::new(vec![3]).unwrap(), vec![1.0, 2.0, 3.0]).unwrap();
        let expr = ExprNode::leaf(pred);
        let mse = Mse::new(&expr, &target);
        assert_eq!(mse.loss, 0.0);
    }
}
