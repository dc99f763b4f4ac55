//! tensorlane: a self-contained tensor engine with automatic
//! differentiation, packed-lane kernels, and a gemm-backed convolution
//! stack, layered as:
//!
//! `shape`/`tensor`/`lanes`/`gemm`/`opcode` (storage & kernels) ->
//! `interpreter`/`conv` (fused execution) -> `expr`/`variable`/`autograd`
//! (graph & backprop) -> `nn`/`optimizer` (layers & training) -> `train`.
//!
//! Use [`runtime::set_seed`] before initialization/training for
//! reproducible runs.

pub mod autograd;
pub mod conv;
pub mod data;
pub mod error;
pub mod expr;
pub mod gemm;
pub mod init;
pub mod interpreter;
pub mod lanes;
pub mod nn;
pub mod opcode;
pub mod optimizer;
pub mod runtime;
pub mod shape;
pub mod state_io;
pub mod tensor;
pub mod train;
pub mod variable;

pub use autograd::{forward, Forward};
pub use data::{DataError, DataLoader, Dataset, InMemoryDataset};
pub use error::{EngineError, EngineResult};
pub use expr::{matmul, ExprNode, Shared};
pub use init::{he_normal, xavier_uniform};
pub use nn::{Conv1d, Conv2d, Linear, Module, ReLU, Sigmoid, MLP2};
pub use optimizer::{Adam, AdamConfig, Momentum, MomentumConfig, Optimizer, OptimizerError, Sgd, SgdConfig};
pub use runtime::{set_seed, with_rng};
pub use shape::{Shape, ShapeError};
pub use state_io::{load_state_dict, save_state_dict, StateIoError};
pub use tensor::{Float, Tensor, TensorError};
pub use train::{EpochResult, TrainConfig, TrainError, Trainer, TrainStepResult};
pub use variable::Variable;
