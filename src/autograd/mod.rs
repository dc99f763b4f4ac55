//! Autograd: forward pass with per-node caching, then a reverse sweep that
//! seeds each leaf [`crate::variable::Variable`]'s gradient. Composable
//! (arbitrary expression trees), debuggable (inspect `result` before
//! calling back), verifiable (see [`check`]).

pub mod check;

use crate::expr::ExprNode;
use crate::tensor::Tensor;

/// The result of running a forward pass: holds the computed value and a
/// reference to the expression so `backward` can re-walk it using the
/// caches populated during forward.
pub struct Forward<'a> {
    root: &'a ExprNode,
    pub result: Tensor,
}

/// Evaluate `expr`, caching every node's value along the way so a
/// subsequent [`Forward::backward`] call does not recompute the forward
/// pass.
pub fn forward(expr: &ExprNode) -> Forward<'_> {
    let result = expr.populate_cache(false);
    Forward { root: expr, result }
}

impl<'a> Forward<'a> {
    /// Run the reverse sweep, seeding the root with `grad` (typically a
    /// scalar `1.0` for a loss, or the upstream gradient when this
    /// expression is itself a sub-tree of a larger graph). Accumulates into
    /// every trainable leaf's gradient; does not zero gradients first — the
    /// caller is responsible for `zero_grad` between optimizer steps.
    pub fn backward(&self, grad: Tensor) {
        self.root.backward_internal(&grad);
    }
}
