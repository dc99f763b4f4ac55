//! The stack-machine interpreter: executes a postfix [`Stream`] over a list
//! of tensor operands in one fused pass, one output element at a time.
//!
//! The reference engine batches `LANE_WIDTH` elements per outer-loop step
//! using literal SIMD registers; this port's lanes are logical (see
//! `lanes.rs`), so the outer loop here advances one element at a time while
//! still reading through the wrapped tail for broadcast operands — the
//! fusion property (no intermediate tensor allocated for a lane-local
//! subexpression) is preserved exactly, only the literal vector width is
//! not.

use crate::opcode::{OpCode, Stream};
use crate::shape::Shape;
use crate::tensor::{Float, Tensor};

/// Execute `stream` against `inputs` (one tensor per `Var` occurrence, in
/// order) and return a freshly allocated result tensor shaped as the
/// largest-rank input (ties favor the first, matching [`Shape::broadcasted`]
/// applied pairwise left to right).
pub fn const_eval(stream: &Stream, inputs: &[Tensor]) -> Tensor {
    if stream.as_slice() == [OpCode::Var] && inputs.len() == 1 {
        // Identity stream: no copy, share the input's handle.
        return inputs[0].clone();
    }
    let out_shape = max_shape(inputs);
    let out = Tensor::zeros(out_shape);
    eval(stream, inputs, &out);
    out
}

/// Execute `stream` against `inputs`, writing into the (already allocated)
/// `out` tensor, whose shape determines the number of output elements.
pub fn eval(stream: &Stream, inputs: &[Tensor], out: &Tensor) {
    let size = out.size();
    for i in 0..size {
        let mut registers: Vec<Float> = Vec::with_capacity(stream.len());
        let mut next_input = 0usize;
        for op in stream.as_slice() {
            match op {
                OpCode::Var => {
                    let t = &inputs[next_input];
                    next_input += 1;
                    registers.push(t.get_broadcast(i));
                }
                OpCode::Sum => {
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(a + b);
                }
                OpCode::Diff => {
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(a - b);
                }
                OpCode::Mul => {
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(a * b);
                }
                OpCode::Div => {
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(a / b);
                }
                OpCode::Fma => {
                    let c = registers.pop().unwrap();
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(<Float as crate::lanes::Lane>::fma(a, b, c));
                }
                OpCode::Fam => {
                    // res[0] + res[1]*res[2], i.e. fma(b, c, a).
                    let c = registers.pop().unwrap();
                    let b = registers.pop().unwrap();
                    let a = registers.pop().unwrap();
                    registers.push(<Float as crate::lanes::Lane>::fma(b, c, a));
                }
                OpCode::Relu => {
                    let a = registers.pop().unwrap();
                    registers.push(a.max(0.0));
                }
                OpCode::Exp => {
                    let a = registers.pop().unwrap();
                    registers.push(<Float as crate::lanes::Lane>::lane_exp(a));
                }
                OpCode::Log => {
                    let a = registers.pop().unwrap();
                    registers.push(<Float as crate::lanes::Lane>::lane_ln(a));
                }
                OpCode::FlipSign => {
                    let a = registers.pop().unwrap();
                    registers.push(-a);
                }
                OpCode::Sqrt => {
                    let a = registers.pop().unwrap();
                    registers.push(a.sqrt());
                }
                OpCode::MatMul { .. }
                | OpCode::Conv1d
                | OpCode::Conv2d
                | OpCode::Transpose
                | OpCode::Flatten
                | OpCode::Indexer
                | OpCode::Shared => {
                    unreachable!("needs-temporary op reached the lane-local interpreter")
                }
            }
        }
        debug_assert_eq!(registers.len(), 1, "stream did not reduce to a single value");
        out.set_unchecked(i, registers.pop().unwrap());
    }
    out.wrap_for_broadcasting();
}

fn max_shape(inputs: &[Tensor]) -> Shape {
    let mut best: Option<&Shape> = None;
    for t in inputs {
        best = Some(match best {
            None => t.shape(),
            Some(b) if t.shape().dimension() > b.dimension() => t.shape(),
            Some(b) => b,
        });
    }
    best.cloned().expect("at least one input").clone()
}

/// Sum `tensor` into a freshly zeroed tensor of `target_shape` by flat-index
/// modulo the target's size — the inverse of the broadcast read rule,
/// used to reduce a gradient back down to a broadcast-source child's shape.
pub fn reduce_axis(tensor: &Tensor, target_shape: Shape) -> Tensor {
    let res = Tensor::zeros(target_shape);
    let res_size = res.size();
    for i in 0..tensor.size() {
        let v = res.get_unchecked(i % res_size) + tensor.get_unchecked(i);
        res.set_unchecked(i % res_size, v);
    }
    res.wrap_for_broadcasting();
    res
}

/// Mask `input_grad` by `tensor > 0`, in place; `tensor` is the relu node's
/// *cached input* (pre-activation), not its output.
pub fn relu_backprop(input_grad: &Tensor, tensor: &Tensor) {
    for i in 0..input_grad.size() {
        let t = tensor.get_unchecked(i);
        if !(t > 0.0) {
            input_grad.set_unchecked(i, 0.0);
        }
    }
    input_grad.wrap_for_broadcasting();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn fma_stream_matches_scalar_reference() {
        let a = Tensor::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_vec(Shape::new(vec![4]).unwrap(), vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        let c = Tensor::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let stream = Stream(vec![OpCode::Var, OpCode::Var, OpCode::Var, OpCode::Fma]);
        let out = const_eval(&stream, &[a, b, c]);
        for (i, &expected) in [11.0, 41.0, 91.0, 161.0].iter().enumerate() {
            assert_eq!(out.get_unchecked(i), expected);
        }
    }

    #[test]
    fn broadcast_scalar_addition() {
        let a = Tensor::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let s = Tensor::from_vec(Shape::new(vec![1]).unwrap(), vec![10.0]).unwrap();
        let stream = Stream(vec![OpCode::Var, OpCode::Var, OpCode::Sum]);
        let out = const_eval(&stream, &[a, s]);
        for (i, &expected) in [11.0, 12.0, 13.0, 14.0].iter().enumerate() {
            assert_eq!(out.get_unchecked(i), expected);
        }
    }

    #[test]
    fn reduce_axis_sums_modulo_target_size() {
        let grad = Tensor::from_vec(Shape::new(vec![4]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let reduced = reduce_axis(&grad, Shape::new(vec![2]).unwrap());
        assert_eq!(reduced.get_unchecked(0), 1.0 + 3.0);
        assert_eq!(reduced.get_unchecked(1), 2.0 + 4.0);
    }
}
