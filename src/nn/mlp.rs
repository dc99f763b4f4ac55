//! Simple MLP: Linear -> ReLU -> Linear, the MNIST-1D reference workload's
//! classifier.

use super::module::Module;
use super::Layer;
use crate::expr::ExprNode;
use crate::variable::Variable;

/// Two-layer MLP: `linear1 -> ReLU -> linear2`.
pub struct MLP2 {
    pub linear1: super::Linear,
    pub linear2: super::Linear,
}

impl MLP2 {
    pub fn new(in_features: usize, hidden: usize, out_features: usize) -> Self {
        MLP2 {
            linear1: super::Linear::named("linear1", in_features, hidden),
            linear2: super::Linear::named("linear2", hidden, out_features),
        }
    }

    /// He-normal init on both layers, matching a ReLU-activated hidden unit.
    pub fn init_he(&mut self) {
        self.linear1.init_he();
        self.linear2.init_he();
    }
}

impl Module for MLP2 {
    fn parameters(&self) -> Vec<&Variable> {
        self.linear1.parameters().into_iter().chain(self.linear2.parameters()).collect()
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        let h = self.linear1.forward(input).relu();
        self.linear2.forward(h)
    }
}

impl Layer for MLP2 {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn forward_produces_expected_output_shape() {
        let mut mlp = MLP2::new(4, 8, 3);
        mlp.init_he();
        crate::runtime::set_seed(42);

        let x = Variable::constant(
            crate::tensor::Tensor::from_vec(Shape::new(vec![2, 4]).unwrap(), vec![0.0; 8]).unwrap(),
        );
        let out = mlp.forward(ExprNode::leaf(x)).eval();
        assert_eq!(out.shape().dims(), &[2, 3]);
    }
}
