//! Activation layers: ReLU (native opcode), Sigmoid (composed from
//! primitives — the instruction alphabet has no dedicated sigmoid opcode).

use super::module::Module;
use super::Layer;
use crate::expr::ExprNode;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::variable::Variable;

/// ReLU: `max(0, x)`. No parameters.
#[derive(Default)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn parameters(&self) -> Vec<&Variable> {
        vec![]
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        input.relu()
    }
}

impl Layer for ReLU {}

fn one() -> ExprNode {
    ExprNode::leaf(Variable::constant(Tensor::from_vec(Shape::scalar(), vec![1.0]).unwrap()))
}

/// Sigmoid: `1 / (1 + exp(-x))`, built as `one().div(one().sum(neg(x).exp()))`
/// from the primitive opcode set (no native sigmoid instruction).
#[derive(Default)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Sigmoid
    }
}

impl Module for Sigmoid {
    fn parameters(&self) -> Vec<&Variable> {
        vec![]
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        let exp_neg_x = (-input).exp();
        one().div(one().sum(exp_neg_x))
    }
}

impl Layer for Sigmoid {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_of_zero_is_one_half() {
        let x = Variable::constant(Tensor::from_vec(Shape::scalar(), vec![0.0]).unwrap());
        let out = Sigmoid::new().forward(ExprNode::leaf(x)).eval();
        assert!((out.get_unchecked(0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn relu_clips_negative_input() {
        let x = Variable::constant(Tensor::from_vec(Shape::new(vec![2]).unwrap(), vec![-1.0, 3.0]).unwrap());
        let out = ReLU::new().forward(ExprNode::leaf(x)).eval();
        assert_eq!(out.get_unchecked(0), 0.0);
        assert_eq!(out.get_unchecked(1), 3.0);
    }
}
