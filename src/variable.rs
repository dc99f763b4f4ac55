//! A [`Variable`] is a tensor plus, if trainable, a companion gradient
//! tensor of the same shape. Created with zeroed content; an initializer or
//! deserialized state fills it in later. The optimizer reads the gradient
//! and writes the parameter, then zeroes the gradient.

use crate::shape::Shape;
use crate::tensor::Tensor;

#[derive(Clone)]
pub struct Variable {
    pub tensor: Tensor,
    pub grad: Option<Tensor>,
    pub name: Option<String>,
    pub frozen: bool,
}

impl Variable {
    /// A trainable variable: zero-filled tensor and a zeroed gradient of
    /// the same shape.
    pub fn trainable(shape: Shape) -> Self {
        Variable {
            tensor: Tensor::zeros(shape.clone()),
            grad: Some(Tensor::zeros(shape)),
            name: None,
            frozen: false,
        }
    }

    /// A non-trainable variable (plain input/constant): no gradient slot.
    pub fn constant(tensor: Tensor) -> Self {
        Variable { tensor, grad: None, name: None, frozen: true }
    }

    pub fn requires_grad(&self) -> bool {
        self.grad.is_some() && !self.frozen
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Accumulate `grad` into this variable's own gradient tensor
    /// (reduced to this variable's shape if `grad` has a broadcasted one).
    pub fn accumulate_grad(&self, grad: &Tensor) {
        let Some(own_grad) = &self.grad else { return };
        if self.frozen {
            return;
        }
        let reduced = if grad.size() == own_grad.size() {
            grad.clone()
        } else {
            crate::interpreter::reduce_axis(grad, own_grad.shape().clone())
        };
        for i in 0..own_grad.size() {
            let v = own_grad.get_unchecked(i) + reduced.get_unchecked(i);
            own_grad.set_unchecked(i, v);
        }
        own_grad.wrap_for_broadcasting();
    }

    pub fn zero_grad(&self) {
        if let Some(g) = &self.grad {
            g.set_zero();
        }
    }
}
