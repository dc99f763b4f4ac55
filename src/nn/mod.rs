//! Neural network abstraction: Module, Layer, Linear, Conv1d/Conv2d,
//! activations, and the fused losses.

pub mod activation;
pub mod conv;
pub mod layer;
pub mod linear;
pub mod loss;
pub mod mlp;
pub mod module;

pub use activation::{ReLU, Sigmoid};
pub use conv::{Conv1d, Conv1dConfig, Conv2d, Conv2dConfig};
pub use layer::Layer;
pub use linear::{Linear, LinearConfig};
pub use loss::{Mse, SoftmaxCrossEntropy};
pub use mlp::MLP2;
pub use module::Module;
