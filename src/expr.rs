//! Expression nodes: leaf / unary / binary / ternary, each knowing its own
//! linearization, forward-cache policy, and backward rule (§4.6). The graph
//! is represented at the value level — an enum of opcodes with owned
//! children — rather than monomorphized per expression tree; see
//! DESIGN.md for the tradeoff this accepts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::conv;
use crate::gemm;
use crate::interpreter;
use crate::opcode::{OpCode, Stream};
use crate::shape::Shape;
use crate::tensor::{Float, Tensor};
use crate::variable::Variable;

#[derive(Clone, Copy, Debug)]
enum UnaryKind {
    Relu,
    Exp,
    Log,
    FlipSign,
    Sqrt,
    Transpose,
    Flatten,
    Indexer(usize),
}

#[derive(Clone, Copy, Debug)]
enum BinaryKind {
    Sum,
    Diff,
    Mul,
    Div,
    MatMul { transpose_left: bool, transpose_right: bool },
}

#[derive(Clone, Copy, Debug)]
enum TernaryKind {
    Fma,
    Fam,
    Conv1d { stride: usize },
    Conv2d { stride_h: usize, stride_w: usize, pad_h: usize, pad_w: usize },
}

enum Op {
    Leaf(Variable),
    Unary(UnaryKind, Box<ExprNode>),
    Binary(BinaryKind, Box<ExprNode>, Box<ExprNode>),
    Ternary(TernaryKind, Box<ExprNode>, Box<ExprNode>, Box<ExprNode>),
    SharedRef(Shared),
}

/// One node of an expression tree built from variables via arithmetic and
/// the free functions in this module (`relu`, `matmul`, `conv1d`, ...).
pub struct ExprNode {
    op: Op,
    /// Populated for "needs-temporary" nodes during `eval`; populated for
    /// every node during `forward`/`backward`.
    cache: RefCell<Option<Tensor>>,
    /// Only meaningful for `Flatten`/`Indexer`: the pre-op shape, needed to
    /// reconstruct the child's gradient shape on the way back down.
    saved_shape: RefCell<Option<Shape>>,
}

impl ExprNode {
    fn new(op: Op) -> Self {
        ExprNode { op, cache: RefCell::new(None), saved_shape: RefCell::new(None) }
    }

    pub fn leaf(var: Variable) -> Self {
        ExprNode::new(Op::Leaf(var))
    }

    fn needs_temporary(&self) -> bool {
        match &self.op {
            Op::Leaf(_) => false,
            Op::Unary(k, _) => matches!(k, UnaryKind::Transpose | UnaryKind::Flatten | UnaryKind::Indexer(_)),
            Op::Binary(k, _, _) => matches!(k, BinaryKind::MatMul { .. }),
            Op::Ternary(k, _, _, _) => matches!(k, TernaryKind::Conv1d { .. } | TernaryKind::Conv2d { .. }),
            Op::SharedRef(_) => true,
        }
    }

    // ---- construction helpers -------------------------------------------------

    pub fn relu(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Relu, Box::new(self)))
    }
    pub fn exp(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Exp, Box::new(self)))
    }
    pub fn log(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Log, Box::new(self)))
    }
    pub fn sqrt(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Sqrt, Box::new(self)))
    }
    pub fn transpose(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Transpose, Box::new(self)))
    }
    pub fn flatten(self) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Flatten, Box::new(self)))
    }
    pub fn indexer(self, index: usize) -> Self {
        ExprNode::new(Op::Unary(UnaryKind::Indexer(index), Box::new(self)))
    }

    pub fn sum(self, rhs: Self) -> Self {
        ExprNode::new(Op::Binary(BinaryKind::Sum, Box::new(self), Box::new(rhs)))
    }
    pub fn diff(self, rhs: Self) -> Self {
        ExprNode::new(Op::Binary(BinaryKind::Diff, Box::new(self), Box::new(rhs)))
    }
    pub fn mul(self, rhs: Self) -> Self {
        ExprNode::new(Op::Binary(BinaryKind::Mul, Box::new(self), Box::new(rhs)))
    }
    pub fn div(self, rhs: Self) -> Self {
        ExprNode::new(Op::Binary(BinaryKind::Div, Box::new(self), Box::new(rhs)))
    }
    pub fn matmul(self, rhs: Self) -> Self {
        ExprNode::new(Op::Binary(
            BinaryKind::MatMul { transpose_left: false, transpose_right: false },
            Box::new(self),
            Box::new(rhs),
        ))
    }

    pub fn fma(a: Self, b: Self, c: Self) -> Self {
        ExprNode::new(Op::Ternary(TernaryKind::Fma, Box::new(a), Box::new(b), Box::new(c)))
    }
    pub fn conv1d(kernel: Self, input: Self, bias: Self, stride: usize) -> Self {
        ExprNode::new(Op::Ternary(
            TernaryKind::Conv1d { stride },
            Box::new(kernel),
            Box::new(input),
            Box::new(bias),
        ))
    }
    pub fn conv2d(
        kernel: Self,
        input: Self,
        bias: Self,
        stride_h: usize,
        stride_w: usize,
        pad_h: usize,
        pad_w: usize,
    ) -> Self {
        ExprNode::new(Op::Ternary(
            TernaryKind::Conv2d { stride_h, stride_w, pad_h, pad_w },
            Box::new(kernel),
            Box::new(input),
            Box::new(bias),
        ))
    }

    pub fn shared(self) -> Shared {
        Shared(Rc::new(SharedInner {
            child: self,
            cache: RefCell::new(None),
            consumer_count: Cell::new(0),
            received: Cell::new(0),
            grad_accum: RefCell::new(None),
        }))
    }

    // ---- simplify ---------------------------------------------------------

    /// Type-level rewrite (here: value-level): folds `sum(mul(a,b), c)` and
    /// its mirror into `fma`/`fam`, and folds a `transpose` child into a
    /// `matmul`'s transpose flags. Idempotent: nothing it produces matches
    /// a pattern it would rewrite again.
    pub fn simplify(&self) -> ExprNode {
        match &self.op {
            Op::Leaf(var) => ExprNode::leaf(var.clone()),
            Op::Unary(k, child) => {
                let child_s = child.simplify();
                ExprNode::new(Op::Unary(*k, Box::new(child_s)))
            }
            Op::Binary(k, l, r) => {
                let l_s = l.simplify();
                let r_s = r.simplify();
                fold_binary(*k, l_s, r_s)
            }
            Op::Ternary(k, a, b, c) => ExprNode::new(Op::Ternary(
                *k,
                Box::new(a.simplify()),
                Box::new(b.simplify()),
                Box::new(c.simplify()),
            )),
            Op::SharedRef(shared) => ExprNode::new(Op::SharedRef(shared.clone())),
        }
    }

    // ---- linearization & tensor collection --------------------------------

    pub fn linearize(&self, recursive: bool) -> Stream {
        if self.needs_temporary() {
            return Stream::single(OpCode::Var);
        }
        match &self.op {
            Op::Leaf(_) => Stream::single(OpCode::Var),
            Op::Unary(k, child) => {
                let opcode = unary_opcode(*k);
                if recursive {
                    let mut s = child.linearize(true);
                    s.push_back(opcode);
                    s
                } else {
                    Stream(vec![OpCode::Var, opcode])
                }
            }
            Op::Binary(k, l, r) => {
                let opcode = binary_opcode(*k);
                if recursive {
                    let mut s = l.linearize(true);
                    s.0.extend(r.linearize(true).0);
                    s.push_back(opcode);
                    s
                } else {
                    Stream(vec![OpCode::Var, OpCode::Var, opcode])
                }
            }
            Op::Ternary(k, a, b, c) => {
                let opcode = ternary_opcode(*k);
                if recursive {
                    let mut s = a.linearize(true);
                    s.0.extend(b.linearize(true).0);
                    s.0.extend(c.linearize(true).0);
                    s.push_back(opcode);
                    s
                } else {
                    Stream(vec![OpCode::Var, OpCode::Var, OpCode::Var, opcode])
                }
            }
            Op::SharedRef(_) => Stream::single(OpCode::Var),
        }
    }

    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        if self.needs_temporary() {
            out.push(self.cache.borrow().clone().expect("needs-temporary node not materialized"));
            return;
        }
        match &self.op {
            Op::Leaf(var) => out.push(var.tensor.clone()),
            Op::Unary(_, child) => child.collect_tensors(out),
            Op::Binary(_, l, r) => {
                l.collect_tensors(out);
                r.collect_tensors(out);
            }
            Op::Ternary(_, a, b, c) => {
                a.collect_tensors(out);
                b.collect_tensors(out);
                c.collect_tensors(out);
            }
            Op::SharedRef(_) => unreachable!("shared always needs a temporary"),
        }
    }

    /// The value of this node, computed (and fused across any lane-local
    /// descendants) without materializing it into the cache, unless it is
    /// itself a needs-temporary node (whose cache must already be populated
    /// by a prior `materialize_eval` call).
    fn value_for_eval(&self) -> Tensor {
        if self.needs_temporary() {
            return self.cache.borrow().clone().expect("temporary not materialized");
        }
        if let Op::Leaf(var) = &self.op {
            return var.tensor.clone();
        }
        let stream = self.linearize(true);
        let mut tensors = Vec::new();
        self.collect_tensors(&mut tensors);
        interpreter::const_eval(&stream, &tensors)
    }

    /// Recurse into children; materialize (into `cache`) any node that
    /// needs a temporary. Leaves every lane-local node's cache empty.
    fn materialize_eval(&self) {
        match &self.op {
            Op::Leaf(_) => {}
            Op::Unary(k, child) => {
                child.materialize_eval();
                if self.needs_temporary() {
                    let v = self.compute_unary_value(*k, child);
                    *self.cache.borrow_mut() = Some(v);
                }
            }
            Op::Binary(k, l, r) => {
                l.materialize_eval();
                r.materialize_eval();
                if self.needs_temporary() {
                    let lv = l.value_for_eval();
                    let rv = r.value_for_eval();
                    let v = compute_binary_temp(*k, &lv, &rv);
                    *self.cache.borrow_mut() = Some(v);
                }
            }
            Op::Ternary(k, a, b, c) => {
                a.materialize_eval();
                b.materialize_eval();
                c.materialize_eval();
                if self.needs_temporary() {
                    let av = a.value_for_eval();
                    let bv = b.value_for_eval();
                    let cv = c.value_for_eval();
                    let v = compute_ternary_temp(*k, &av, &bv, &cv);
                    *self.cache.borrow_mut() = Some(v);
                }
            }
            Op::SharedRef(shared) => {
                let v = shared.materialize();
                *self.cache.borrow_mut() = Some(v);
            }
        }
    }

    fn compute_unary_value(&self, k: UnaryKind, child: &ExprNode) -> Tensor {
        let cv = child.value_for_eval();
        match k {
            UnaryKind::Transpose => transpose_2d(&cv),
            UnaryKind::Flatten => {
                *self.saved_shape.borrow_mut() = Some(cv.shape().clone());
                flatten_value(&cv)
            }
            UnaryKind::Indexer(idx) => {
                *self.saved_shape.borrow_mut() = Some(cv.shape().clone());
                index_value(&cv, idx)
            }
            _ => unreachable!("not a needs-temporary unary op"),
        }
    }

    /// Evaluate this expression for inference/eval only (no gradient
    /// tracking needed afterwards).
    pub fn eval(&self) -> Tensor {
        let simplified = self.simplify();
        simplified.materialize_eval();
        simplified.value_for_eval()
    }

    // ---- forward caching for backprop --------------------------------------

    /// Populate `cache` at this node and every descendant; `use_cache`
    /// short-circuits recomputation where a cache already exists.
    pub(crate) fn populate_cache(&self, use_cache: bool) -> Tensor {
        if use_cache {
            if let Some(v) = self.cache.borrow().clone() {
                return v;
            }
        }
        let value = match &self.op {
            Op::Leaf(var) => var.tensor.clone(),
            Op::Unary(k, child) => {
                let cv = child.populate_cache(use_cache);
                match k {
                    UnaryKind::Relu => elementwise_unary(&cv, OpCode::Relu),
                    UnaryKind::Exp => elementwise_unary(&cv, OpCode::Exp),
                    UnaryKind::Log => elementwise_unary(&cv, OpCode::Log),
                    UnaryKind::FlipSign => elementwise_unary(&cv, OpCode::FlipSign),
                    UnaryKind::Sqrt => elementwise_unary(&cv, OpCode::Sqrt),
                    UnaryKind::Transpose => transpose_2d(&cv),
                    UnaryKind::Flatten => {
                        *self.saved_shape.borrow_mut() = Some(cv.shape().clone());
                        flatten_value(&cv)
                    }
                    UnaryKind::Indexer(idx) => {
                        *self.saved_shape.borrow_mut() = Some(cv.shape().clone());
                        index_value(&cv, *idx)
                    }
                }
            }
            Op::Binary(k, l, r) => {
                let lv = l.populate_cache(use_cache);
                let rv = r.populate_cache(use_cache);
                match k {
                    BinaryKind::MatMul { .. } => compute_binary_temp(*k, &lv, &rv),
                    _ => elementwise_binary(&lv, &rv, binary_opcode(*k)),
                }
            }
            Op::Ternary(k, a, b, c) => {
                let av = a.populate_cache(use_cache);
                let bv = b.populate_cache(use_cache);
                let cv = c.populate_cache(use_cache);
                compute_ternary_temp(*k, &av, &bv, &cv)
            }
            Op::SharedRef(shared) => shared.materialize(),
        };
        *self.cache.borrow_mut() = Some(value.clone());
        value
    }

    /// Given an incoming gradient, recurse into children with their
    /// gradient contributions (§4.6).
    pub(crate) fn backward_internal(&self, grad: &Tensor) {
        match &self.op {
            Op::Leaf(var) => var.accumulate_grad(grad),
            Op::Unary(k, child) => {
                let child_cached = child.populate_cache(true);
                let child_grad = match k {
                    UnaryKind::Relu => {
                        let g = grad.deep_clone();
                        interpreter::relu_backprop(&g, &child_cached);
                        g
                    }
                    UnaryKind::Exp => {
                        let self_cached = self.cache.borrow().clone().expect("forward ran");
                        elementwise_binary(grad, &self_cached, OpCode::Mul)
                    }
                    UnaryKind::Log => elementwise_binary(grad, &child_cached, OpCode::Div),
                    UnaryKind::FlipSign => elementwise_unary(grad, OpCode::FlipSign),
                    UnaryKind::Sqrt => {
                        let self_cached = self.cache.borrow().clone().expect("forward ran");
                        let half = Tensor::from_vec(Shape::scalar(), vec![0.5]).unwrap();
                        let num = elementwise_binary(grad, &half, OpCode::Mul);
                        elementwise_binary(&num, &self_cached, OpCode::Div)
                    }
                    UnaryKind::Transpose => transpose_2d(grad),
                    UnaryKind::Flatten => {
                        let shape = self.saved_shape.borrow().clone().expect("forward ran");
                        reshape_grad(grad, shape)
                    }
                    UnaryKind::Indexer(idx) => {
                        let shape = self.saved_shape.borrow().clone().expect("forward ran");
                        let out = Tensor::zeros(shape);
                        out.set_flat(*idx, grad.get_unchecked(0)).unwrap();
                        out.wrap_for_broadcasting();
                        out
                    }
                };
                child.backward_internal(&child_grad);
            }
            Op::Binary(k, l, r) => {
                let l_cached = l.populate_cache(true);
                let r_cached = r.populate_cache(true);
                let (lg, rg) = binary_backward(*k, &l_cached, &r_cached, grad);
                l.backward_internal(&lg);
                r.backward_internal(&rg);
            }
            Op::Ternary(k, a, b, c) => {
                let av = a.populate_cache(true);
                let bv = b.populate_cache(true);
                let cv = c.populate_cache(true);
                let (ag, bg, cg) = ternary_backward(*k, &av, &bv, &cv, grad);
                a.backward_internal(&ag);
                b.backward_internal(&bg);
                c.backward_internal(&cg);
            }
            Op::SharedRef(shared) => shared.backward_internal(grad),
        }
    }
}

// ---- std::ops ergonomics --------------------------------------------------

impl std::ops::Add for ExprNode {
    type Output = ExprNode;
    fn add(self, rhs: ExprNode) -> ExprNode {
        self.sum(rhs)
    }
}
impl std::ops::Sub for ExprNode {
    type Output = ExprNode;
    fn sub(self, rhs: ExprNode) -> ExprNode {
        self.diff(rhs)
    }
}
impl std::ops::Mul for ExprNode {
    type Output = ExprNode;
    fn mul(self, rhs: ExprNode) -> ExprNode {
        self.mul(rhs)
    }
}
impl std::ops::Div for ExprNode {
    type Output = ExprNode;
    fn div(self, rhs: ExprNode) -> ExprNode {
        self.div(rhs)
    }
}
impl std::ops::Neg for ExprNode {
    type Output = ExprNode;
    fn neg(self) -> ExprNode {
        ExprNode::new(Op::Unary(UnaryKind::FlipSign, Box::new(self)))
    }
}

pub fn matmul(a: ExprNode, b: ExprNode) -> ExprNode {
    a.matmul(b)
}

// ---- Shared (DAG) node ------------------------------------------------------

struct SharedInner {
    child: ExprNode,
    cache: RefCell<Option<Tensor>>,
    consumer_count: Cell<usize>,
    received: Cell<usize>,
    grad_accum: RefCell<Option<Tensor>>,
}

/// A handle to a sub-expression evaluated once and referenced by multiple
/// consumers. Call [`Shared::node`] once per distinct place it is used in
/// the tree; in the reverse sweep, gradient contributions from every such
/// use are accumulated and flushed into the wrapped child exactly once
/// (the reference engine's documented bug — forwarding only the last
/// gradient — is deliberately not reproduced here).
#[derive(Clone)]
pub struct Shared(Rc<SharedInner>);

impl Shared {
    pub fn node(&self) -> ExprNode {
        self.0.consumer_count.set(self.0.consumer_count.get() + 1);
        ExprNode::new(Op::SharedRef(self.clone()))
    }

    fn materialize(&self) -> Tensor {
        if let Some(v) = self.0.cache.borrow().clone() {
            return v;
        }
        let v = self.0.child.populate_cache(false);
        *self.0.cache.borrow_mut() = Some(v.clone());
        v
    }

    fn backward_internal(&self, grad: &Tensor) {
        {
            let mut acc = self.0.grad_accum.borrow_mut();
            match acc.as_mut() {
                None => *acc = Some(grad.deep_clone()),
                Some(existing) => {
                    for i in 0..existing.size() {
                        let v = existing.get_unchecked(i) + grad.get_unchecked(i);
                        existing.set_unchecked(i, v);
                    }
                    existing.wrap_for_broadcasting();
                }
            }
        }
        let received = self.0.received.get() + 1;
        self.0.received.set(received);
        if received >= self.0.consumer_count.get().max(1) {
            let final_grad = self.0.grad_accum.borrow_mut().take().expect("accumulated");
            self.0.child.backward_internal(&final_grad);
            self.0.received.set(0);
        }
    }
}

// ---- simplifier rules --------------------------------------------------------

fn fold_binary(k: BinaryKind, l: ExprNode, r: ExprNode) -> ExprNode {
    match k {
        BinaryKind::Sum => {
            if let Op::Binary(BinaryKind::Mul, a, b) = l.op {
                return ExprNode::fma(*a, *b, r);
            }
            if let Op::Binary(BinaryKind::Mul, a, b) = r.op {
                return ExprNode::new(Op::Ternary(TernaryKind::Fam, Box::new(l), a, b));
            }
            ExprNode::new(Op::Binary(BinaryKind::Sum, Box::new(l), Box::new(r)))
        }
        BinaryKind::MatMul { transpose_left, transpose_right } => {
            let (l_inner, tl) = unwrap_transpose(l, transpose_left);
            let (r_inner, tr) = unwrap_transpose(r, transpose_right);
            ExprNode::new(Op::Binary(
                BinaryKind::MatMul { transpose_left: tl, transpose_right: tr },
                Box::new(l_inner),
                Box::new(r_inner),
            ))
        }
        _ => ExprNode::new(Op::Binary(k, Box::new(l), Box::new(r))),
    }
}

fn unwrap_transpose(node: ExprNode, flag: bool) -> (ExprNode, bool) {
    if let Op::Unary(UnaryKind::Transpose, inner) = node.op {
        (*inner, !flag)
    } else {
        (node, flag)
    }
}

// ---- opcode mapping -----------------------------------------------------------

fn unary_opcode(k: UnaryKind) -> OpCode {
    match k {
        UnaryKind::Relu => OpCode::Relu,
        UnaryKind::Exp => OpCode::Exp,
        UnaryKind::Log => OpCode::Log,
        UnaryKind::FlipSign => OpCode::FlipSign,
        UnaryKind::Sqrt => OpCode::Sqrt,
        UnaryKind::Transpose => OpCode::Transpose,
        UnaryKind::Flatten => OpCode::Flatten,
        UnaryKind::Indexer(_) => OpCode::Indexer,
    }
}

fn binary_opcode(k: BinaryKind) -> OpCode {
    match k {
        BinaryKind::Sum => OpCode::Sum,
        BinaryKind::Diff => OpCode::Diff,
        BinaryKind::Mul => OpCode::Mul,
        BinaryKind::Div => OpCode::Div,
        BinaryKind::MatMul { transpose_left, transpose_right } => {
            OpCode::MatMul { transpose_left, transpose_right }
        }
    }
}

fn ternary_opcode(k: TernaryKind) -> OpCode {
    match k {
        TernaryKind::Fma => OpCode::Fma,
        TernaryKind::Fam => OpCode::Fam,
        TernaryKind::Conv1d { .. } => OpCode::Conv1d,
        TernaryKind::Conv2d { .. } => OpCode::Conv2d,
    }
}

// ---- elementwise helpers (route through the interpreter, even for a
//      single instruction, so there is exactly one implementation of
//      each lane-local op in the crate) ---------------------------------------

fn elementwise_unary(a: &Tensor, op: OpCode) -> Tensor {
    interpreter::const_eval(&Stream(vec![OpCode::Var, op]), &[a.clone()])
}

fn elementwise_binary(a: &Tensor, b: &Tensor, op: OpCode) -> Tensor {
    interpreter::const_eval(&Stream(vec![OpCode::Var, OpCode::Var, op]), &[a.clone(), b.clone()])
}

fn compute_binary_temp(k: BinaryKind, l: &Tensor, r: &Tensor) -> Tensor {
    match k {
        BinaryKind::MatMul { transpose_left, transpose_right } => {
            matmul_forward(l, r, transpose_left, transpose_right)
        }
        _ => elementwise_binary(l, r, binary_opcode(k)),
    }
}

fn compute_ternary_temp(k: TernaryKind, a: &Tensor, b: &Tensor, c: &Tensor) -> Tensor {
    match k {
        TernaryKind::Fma => {
            let ab = elementwise_binary(a, b, OpCode::Mul);
            elementwise_binary(&ab, c, OpCode::Sum)
        }
        TernaryKind::Fam => {
            let bc = elementwise_binary(b, c, OpCode::Mul);
            elementwise_binary(a, &bc, OpCode::Sum)
        }
        TernaryKind::Conv1d { stride } => conv::conv1d_forward(a, b, c, stride),
        TernaryKind::Conv2d { stride_h, stride_w, pad_h, pad_w } => {
            conv::conv2d_forward(a, b, c, stride_h, stride_w, pad_h, pad_w)
        }
    }
}

fn binary_backward(k: BinaryKind, l: &Tensor, r: &Tensor, grad: &Tensor) -> (Tensor, Tensor) {
    match k {
        BinaryKind::Sum => (reduce_to(grad, l), reduce_to(grad, r)),
        BinaryKind::Diff => {
            let neg = elementwise_unary(grad, OpCode::FlipSign);
            (reduce_to(grad, l), reduce_to(&neg, r))
        }
        BinaryKind::Mul => {
            let lg = elementwise_binary(grad, r, OpCode::Mul);
            let rg = elementwise_binary(grad, l, OpCode::Mul);
            (reduce_to(&lg, l), reduce_to(&rg, r))
        }
        BinaryKind::Div => {
            let lg = elementwise_binary(grad, r, OpCode::Div);
            let l_over_r2 = {
                let r2 = elementwise_binary(r, r, OpCode::Mul);
                let l_over_r2 = elementwise_binary(l, &r2, OpCode::Div);
                elementwise_unary(&l_over_r2, OpCode::FlipSign)
            };
            let rg = elementwise_binary(grad, &l_over_r2, OpCode::Mul);
            (reduce_to(&lg, l), reduce_to(&rg, r))
        }
        BinaryKind::MatMul { transpose_left, transpose_right } => {
            matmul_backward(l, r, grad, transpose_left, transpose_right)
        }
    }
}

fn ternary_backward(
    k: TernaryKind,
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
    grad: &Tensor,
) -> (Tensor, Tensor, Tensor) {
    match k {
        TernaryKind::Fma => {
            // d/da = grad*b, d/db = grad*a, d/dc = grad
            let ag = elementwise_binary(grad, b, OpCode::Mul);
            let bg = elementwise_binary(grad, a, OpCode::Mul);
            (reduce_to(&ag, a), reduce_to(&bg, b), reduce_to(grad, c))
        }
        TernaryKind::Fam => {
            // fam(a,b,c) = a + b*c: d/da=grad, d/db=grad*c, d/dc=grad*b
            let bg = elementwise_binary(grad, c, OpCode::Mul);
            let cg = elementwise_binary(grad, b, OpCode::Mul);
            (reduce_to(grad, a), reduce_to(&bg, b), reduce_to(&cg, c))
        }
        TernaryKind::Conv1d { stride } => conv::conv1d_backward(a, b, c, grad, stride),
        TernaryKind::Conv2d { stride_h, stride_w, pad_h, pad_w } => {
            conv::conv2d_backward(a, b, c, grad, stride_h, stride_w, pad_h, pad_w)
        }
    }
}

fn reduce_to(grad: &Tensor, target: &Tensor) -> Tensor {
    if grad.size() == target.size() {
        grad.clone()
    } else {
        interpreter::reduce_axis(grad, target.shape().clone())
    }
}

// ---- matmul / transpose / flatten / indexer value computation ---------------

fn effective_2d(shape: &Shape) -> (usize, usize) {
    if shape.dimension() == 1 {
        (shape.dims()[0], 1)
    } else {
        let rows = shape.dims()[0];
        (rows, shape.size() / rows)
    }
}

fn flat_values(t: &Tensor) -> Vec<Float> {
    (0..t.size()).map(|i| t.get_unchecked(i)).collect()
}

fn matmul_forward(a: &Tensor, b: &Tensor, transpose_left: bool, transpose_right: bool) -> Tensor {
    let out_shape = Shape::matmul_shape(a.shape(), b.shape(), transpose_left, transpose_right)
        .expect("matmul shapes checked at graph-build time");
    let (a_rows, a_cols) = effective_2d(a.shape());
    let (b_rows, b_cols) = effective_2d(b.shape());
    let mut out = vec![0.0; out_shape.size().max(1)];
    gemm::matmul(
        &flat_values(a),
        &flat_values(b),
        &mut out,
        a_rows,
        a_cols,
        b_rows,
        b_cols,
        transpose_left,
        transpose_right,
    );
    Tensor::from_vec(out_shape, out).unwrap()
}

fn matmul_backward(
    a: &Tensor,
    b: &Tensor,
    grad_c: &Tensor,
    transpose_left: bool,
    transpose_right: bool,
) -> (Tensor, Tensor) {
    let (a_rows, a_cols) = effective_2d(a.shape());
    let (b_rows, b_cols) = effective_2d(b.shape());
    let (c_rows, c_cols) = effective_2d(grad_c.shape());
    let a_data = flat_values(a);
    let b_data = flat_values(b);
    let c_data = flat_values(grad_c);

    // dA_eff = dC @ B_raw (transpose_right = !transpose_right)
    let inner_k = if transpose_left { a_rows } else { a_cols };
    let mut da_eff = vec![0.0; c_rows * inner_k];
    gemm::matmul(&c_data, &b_data, &mut da_eff, c_rows, c_cols, b_rows, b_cols, false, !transpose_right);

    // dB_eff = A_raw @ dC (transpose_left = !transpose_left)
    let mut db_eff = vec![0.0; inner_k * c_cols];
    gemm::matmul(&a_data, &c_data, &mut db_eff, a_rows, a_cols, c_rows, c_cols, !transpose_left, false);

    let grad_a_data = if transpose_left { transpose_2d_raw(&da_eff, c_rows, inner_k) } else { da_eff };
    let grad_b_data = if transpose_right { transpose_2d_raw(&db_eff, inner_k, c_cols) } else { db_eff };

    let grad_a = Tensor::from_vec(a.shape().clone(), grad_a_data).unwrap();
    let grad_b = Tensor::from_vec(b.shape().clone(), grad_b_data).unwrap();
    (grad_a, grad_b)
}

fn transpose_2d_raw(data: &[Float], rows: usize, cols: usize) -> Vec<Float> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    out
}

fn transpose_2d(t: &Tensor) -> Tensor {
    let (rows, cols) = effective_2d(t.shape());
    let data = transpose_2d_raw(&flat_values(t), rows, cols);
    let new_shape = Shape::new(vec![cols, rows]).unwrap();
    Tensor::from_vec(new_shape, data).unwrap()
}

fn flatten_value(t: &Tensor) -> Tensor {
    let dims = t.shape().dims();
    assert!(dims.len() >= 2, "flatten requires rank >= 2 (batch dimension first)");
    let batch = dims[0];
    let rest = t.shape().size() / batch;
    let mut cloned = t.deep_clone();
    cloned.set_shape(Shape::new(vec![batch, rest]).unwrap()).unwrap();
    cloned
}

fn reshape_grad(grad: &Tensor, shape: Shape) -> Tensor {
    let mut g = grad.deep_clone();
    g.set_shape(shape).unwrap();
    g
}

fn index_value(t: &Tensor, index: usize) -> Tensor {
    let v = t.index_flat(index).expect("indexer in range");
    Tensor::from_vec(Shape::scalar(), vec![v]).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use crate::variable::Variable;

    fn leaf_const(shape: Vec<usize>, values: Vec<Float>) -> ExprNode {
        let tensor = Tensor::from_vec(Shape::new(shape).unwrap(), values).unwrap();
        ExprNode::leaf(Variable::constant(tensor))
    }

    #[test]
    fn fma_fusion_scenario() {
        let a = leaf_const(vec![4], vec![1.0, 2.0, 3.0, 4.0]);
        let b = leaf_const(vec![4], vec![10.0, 20.0, 30.0, 40.0]);
        let c = leaf_const(vec![4], vec![1.0, 1.0, 1.0, 1.0]);
        let expr = (a * b) + c;
        let simplified = expr.simplify();
        let stream = simplified.linearize(true);
        assert_eq!(stream.count(&OpCode::Fma), 1);
        assert_eq!(stream.count(&OpCode::Var), 3);
        let out = expr.eval();
        for (i, &expected) in [11.0, 41.0, 91.0, 161.0].iter().enumerate() {
            assert_eq!(out.get_unchecked(i), expected);
        }
    }

    #[test]
    fn matmul_transpose_folds_at_simplify() {
        let x = leaf_const(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let y = leaf_const(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let expr = matmul(x.transpose(), y);
        let simplified = expr.simplify();
        let stream = simplified.linearize(true);
        assert_eq!(stream.count(&OpCode::Transpose), 0);
        assert!(matches!(stream.as_slice()[2], OpCode::MatMul { transpose_left: true, transpose_right: false }));
        let out = expr.eval();
        assert_eq!(out.index_flat(0).unwrap(), 1.0);
        assert_eq!(out.index_flat(1).unwrap(), 3.0);
        assert_eq!(out.index_flat(2).unwrap(), 2.0);
        assert_eq!(out.index_flat(3).unwrap(), 4.0);
    }

    #[test]
    fn relu_grad_autograd_check() {
        // y = relu(w*x + b), w=0.5 x=2.0 b=-0.2
        let w = Variable::trainable(Shape::scalar());
        w.tensor.set_constant(0.5);
        let x = Variable::trainable(Shape::scalar());
        x.tensor.set_constant(2.0);
        let b = Variable::trainable(Shape::scalar());
        b.tensor.set_constant(-0.2);

        let expr = ExprNode::leaf(w.clone()).mul(ExprNode::leaf(x.clone())).sum(ExprNode::leaf(b.clone())).relu();
        let fwd = crate::autograd::forward(&expr);
        fwd.backward(Tensor::from_vec(Shape::scalar(), vec![1.0]).unwrap());

        assert_eq!(w.grad.as_ref().unwrap().get_unchecked(0), 2.0);
        assert_eq!(x.grad.as_ref().unwrap().get_unchecked(0), 0.5);
        assert_eq!(b.grad.as_ref().unwrap().get_unchecked(0), 1.0);
    }
}
