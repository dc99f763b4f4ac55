//! Numerical gradient check: central difference vs autograd, the crate's
//! verifiability story for hand-written backward rules.

use crate::expr::ExprNode;
use crate::tensor::{Float, Tensor};
use crate::variable::Variable;

/// Central-difference epsilon, matching the reference engine's default.
pub const DEFAULT_EPS: Float = 1e-4;
pub const DEFAULT_RTOL: Float = 1e-5;
pub const DEFAULT_ATOL: Float = 1e-8;

/// Compare autograd-computed gradients against a central-difference
/// numerical estimate for every element of every variable in `inputs`.
///
/// `build` constructs a fresh scalar-valued expression each time it is
/// called; since a [`Variable`]'s tensor buffer is reference-counted,
/// perturbing `inputs[i].tensor` in place and calling `build()` again
/// re-evaluates the same graph with that one element perturbed, without
/// rebuilding the variables themselves.
pub fn check_gradients(
    build: impl Fn() -> ExprNode,
    inputs: &[Variable],
    eps: Float,
    rtol: Float,
    atol: Float,
) -> Result<(), String> {
    for v in inputs {
        v.zero_grad();
    }

    let expr = build();
    let fwd = crate::autograd::forward(&expr);
    if fwd.result.size() != 1 {
        return Err(format!(
            "check_gradients requires a scalar-valued expression, got size {}",
            fwd.result.size()
        ));
    }
    fwd.backward(Tensor::from_vec(crate::shape::Shape::scalar(), vec![1.0]).unwrap());

    for (idx, var) in inputs.iter().enumerate() {
        let Some(analytic) = &var.grad else { continue };
        for i in 0..var.tensor.size() {
            let orig = var.tensor.get_unchecked(i);

            var.tensor.set_unchecked(i, orig + eps);
            var.tensor.wrap_for_broadcasting();
            let plus = build().eval().get_unchecked(0);

            var.tensor.set_unchecked(i, orig - eps);
            var.tensor.wrap_for_broadcasting();
            let minus = build().eval().get_unchecked(0);

            var.tensor.set_unchecked(i, orig);
            var.tensor.wrap_for_broadcasting();

            let numerical = (plus - minus) / (2.0 * eps);
            let a = analytic.get_unchecked(i);
            let diff = (a - numerical).abs();
            if diff > atol && diff > rtol * numerical.abs().max(atol) {
                return Err(format!(
                    "gradient mismatch at input {idx} elem {i}: analytic {a} vs numerical {numerical}"
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn relu_chain_passes_numerical_check() {
        let w = Variable::trainable(Shape::scalar());
        w.tensor.set_constant(0.7);
        let x = Variable::trainable(Shape::scalar());
        x.tensor.set_constant(-1.3);
        let b = Variable::trainable(Shape::scalar());
        b.tensor.set_constant(0.4);

        let w2 = w.clone();
        let x2 = x.clone();
        let b2 = b.clone();
        let build = move || {
            ExprNode::leaf(w2.clone())
                .mul(ExprNode::leaf(x2.clone()))
                .sum(ExprNode::leaf(b2.clone()))
                .relu()
        };

        check_gradients(build, &[w, x, b], DEFAULT_EPS, DEFAULT_RTOL, DEFAULT_ATOL).unwrap();
    }

    #[test]
    fn exp_log_chain_passes_numerical_check() {
        let a = Variable::trainable(Shape::scalar());
        a.tensor.set_constant(1.5);
        let b = Variable::trainable(Shape::scalar());
        b.tensor.set_constant(0.3);

        let a2 = a.clone();
        let b2 = b.clone();
        let build = move || ExprNode::leaf(a2.clone()).exp().mul(ExprNode::leaf(b2.clone()).log());

        check_gradients(build, &[a, b], DEFAULT_EPS, DEFAULT_RTOL, DEFAULT_ATOL).unwrap();
    }
}
