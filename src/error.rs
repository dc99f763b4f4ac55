//! Crate-level error aggregation. Individual modules define their own
//! `thiserror` enums; this type is the `?`-friendly umbrella used at the
//! seams where more than one subsystem can fail (training loop, CLI-facing
//! entry points, the test-runner surface).

use thiserror::Error;

use crate::data::DataError;
use crate::optimizer::OptimizerError;
use crate::shape::ShapeError;
use crate::state_io::StateIoError;
use crate::tensor::TensorError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    StateIo(#[from] StateIoError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
    #[error("self-check failed: {0}")]
    SelfCheckFailed(&'static str),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Run the crate's fixed battery of self-checks (shape algebra, a gradient
/// check scenario, a tiny training smoke test) and report a single
/// pass/fail, matching the source's "test-runner surface" (§6): a caller
/// treats any failure as fatal before training starts. This is the Rust
/// realization of "exit non-zero on failure" — callers map `Err` to
/// `std::process::exit(1)` in their own `fn main`, this crate never calls
/// `process::exit` itself.
pub fn run_tests() -> EngineResult<()> {
    use crate::opcode::{OpCode, Stream};
    use crate::shape::Shape;
    use crate::tensor::Tensor;
    use crate::variable::Variable;

    tracing::info!("run_tests: shape algebra");
    let a = Shape::new(vec![2, 3])?;
    let b = Shape::new(vec![3, 5])?;
    let _ = Shape::matmul_shape(&a, &b, false, false)?;

    tracing::info!("run_tests: fused element-wise stream");
    let x = Tensor::from_vec(Shape::new(vec![4])?, vec![1.0, 2.0, 3.0, 4.0])?;
    let y = Tensor::from_vec(Shape::new(vec![4])?, vec![1.0, 1.0, 1.0, 1.0])?;
    let stream = Stream(vec![OpCode::Var, OpCode::Var, OpCode::Sum]);
    let out = crate::interpreter::const_eval(&stream, &[x, y]);
    if out.index_flat(0)? != 2.0 {
        return Err(EngineError::SelfCheckFailed("sum stream produced wrong value"));
    }

    tracing::info!("run_tests: gradient check scenario");
    let w = Variable::trainable(Shape::scalar());
    w.tensor.set_constant(0.5);
    let xv = Variable::trainable(Shape::scalar());
    xv.tensor.set_constant(2.0);
    let b = Variable::trainable(Shape::scalar());
    b.tensor.set_constant(-0.2);
    let expr = crate::expr::ExprNode::leaf(w.clone())
        .mul(crate::expr::ExprNode::leaf(xv.clone()))
        .sum(crate::expr::ExprNode::leaf(b.clone()))
        .relu();
    let fwd = crate::autograd::forward(&expr);
    fwd.backward(Tensor::from_vec(Shape::scalar(), vec![1.0])?);
    if (w.grad.as_ref().unwrap().get_unchecked(0) - 2.0).abs() > 1e-6 {
        return Err(EngineError::SelfCheckFailed("relu(w*x+b) gradient check mismatch"));
    }

    tracing::info!("run_tests: all self-checks passed");
    Ok(())
}
