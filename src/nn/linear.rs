//! Linear: `y = x @ W + b`. One [`Variable`] for the weight, one for the bias.

use serde::{Deserialize, Serialize};

use super::module::Module;
use super::Layer;
use crate::expr::ExprNode;
use crate::init;
use crate::shape::Shape;
use crate::variable::Variable;

/// Construction config for a [`Linear`] layer, round-trippable through
/// `serde_json` alongside a model's state dict.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LinearConfig {
    pub in_features: usize,
    pub out_features: usize,
}

/// Linear layer: output = input @ weight + bias, weight laid out
/// `[in_features, out_features]`.
pub struct Linear {
    pub weight: Variable,
    pub bias: Variable,
}

impl Linear {
    /// Weight and bias start zero-filled; call [`Self::init_he`] or
    /// [`Self::init_xavier`] before training.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Linear {
            weight: Variable::trainable(Shape::new(vec![in_features, out_features]).unwrap()),
            bias: Variable::trainable(Shape::new(vec![out_features]).unwrap()),
        }
    }

    pub fn from_config(config: LinearConfig) -> Self {
        Self::new(config.in_features, config.out_features)
    }

    pub fn named(name: impl AsRef<str>, in_features: usize, out_features: usize) -> Self {
        let prefix = name.as_ref();
        let mut linear = Self::new(in_features, out_features);
        linear.weight = linear.weight.with_name(format!("{prefix}.weight"));
        linear.bias = linear.bias.with_name(format!("{prefix}.bias"));
        linear
    }

    /// He-normal weight init (appropriate ahead of a ReLU); bias stays zero.
    pub fn init_he(&mut self) {
        init::he_init(&self.weight);
    }

    /// Xavier-uniform weight init; bias stays zero.
    pub fn init_xavier(&mut self) {
        init::xavier_init(&self.weight);
    }
}

impl Module for Linear {
    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.weight, &self.bias]
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        input.matmul(ExprNode::leaf(self.weight.clone())).sum(ExprNode::leaf(self.bias.clone()))
    }
}

impl Layer for Linear {}
