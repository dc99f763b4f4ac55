//! Numerical gradient-check tests: compare autograd against a central
//! finite-difference estimate for a handful of representative expressions.
//! Every scenario here builds a scalar-valued graph, since the instruction
//! alphabet has no reduce-to-scalar opcode (see `nn::loss`) — the engine's
//! own losses fuse their reduction outside the graph, and so does this test.

use tensorlane::autograd::check::{check_gradients, DEFAULT_ATOL, DEFAULT_EPS, DEFAULT_RTOL};
use tensorlane::{matmul, ExprNode, Shape, Tensor, Variable};

fn scalar_var(value: f32) -> Variable {
    let v = Variable::trainable(Shape::scalar());
    v.tensor.set_constant(value);
    v
}

#[test]
fn fma_pattern_gradient_matches_numerical() {
    // (a*b + c) simplifies to a fused FMA node; check that the simplifier's
    // rewrite doesn't change the gradient it produces.
    let a = scalar_var(1.5);
    let b = scalar_var(-0.7);
    let c = scalar_var(0.2);

    let (a2, b2, c2) = (a.clone(), b.clone(), c.clone());
    let build = move || {
        ExprNode::leaf(a2.clone()).mul(ExprNode::leaf(b2.clone())).sum(ExprNode::leaf(c2.clone()))
    };

    check_gradients(build, &[a, b, c], DEFAULT_EPS, DEFAULT_RTOL, DEFAULT_ATOL).unwrap();
}

#[test]
fn matmul_dot_product_gradient_matches_numerical() {
    // a: [1,2], c: [2,1] -> matmul(a, c): [1,1], a scalar-shaped dot product.
    let a = Variable::trainable(Shape::new(vec![1, 2]).unwrap());
    for (i, v) in [1.0, 2.0].into_iter().enumerate() {
        a.tensor.set_unchecked(i, v);
    }
    a.tensor.wrap_for_broadcasting();

    let c = Variable::trainable(Shape::new(vec![2, 1]).unwrap());
    for (i, v) in [0.5, -1.5].into_iter().enumerate() {
        c.tensor.set_unchecked(i, v);
    }
    c.tensor.wrap_for_broadcasting();

    let (a2, c2) = (a.clone(), c.clone());
    let build = move || matmul(ExprNode::leaf(a2.clone()), ExprNode::leaf(c2.clone()));

    check_gradients(build, &[a, c], DEFAULT_EPS, DEFAULT_RTOL, DEFAULT_ATOL).unwrap();
}

#[test]
fn relu_gradient_matches_numerical_across_sign_boundaries() {
    // Four independent scalar leaves on both sides of ReLU's kink, summed
    // into one scalar loss so each leaf's local gradient (0 or 1) shows up
    // distinctly in the finite-difference check.
    let leaves: Vec<Variable> = [-1.0, 0.5, 0.01, 2.0].iter().map(|&v| scalar_var(v)).collect();
    let cloned = leaves.clone();
    let build = move || {
        let mut terms: Vec<ExprNode> = cloned.iter().map(|v| ExprNode::leaf(v.clone()).relu()).collect();
        let mut acc = terms.remove(0);
        for t in terms {
            acc = acc.sum(t);
        }
        acc
    };

    check_gradients(build, &leaves, DEFAULT_EPS, DEFAULT_RTOL, DEFAULT_ATOL).unwrap();
}

#[test]
fn matmul_scenario_from_spec_evaluates_exactly() {
    let x = Tensor::from_vec(Shape::new(vec![2, 2]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let y = Tensor::from_vec(Shape::new(vec![2, 2]).unwrap(), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let expr = matmul(ExprNode::leaf(Variable::constant(x)).transpose(), ExprNode::leaf(Variable::constant(y)));
    let out = expr.eval();
    assert_eq!(out.index(&[0, 0]).unwrap(), 1.0);
    assert_eq!(out.index(&[0, 1]).unwrap(), 3.0);
    assert_eq!(out.index(&[1, 0]).unwrap(), 2.0);
    assert_eq!(out.index(&[1, 1]).unwrap(), 4.0);
}
