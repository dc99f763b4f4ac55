//! The postfix opcode alphabet and stream operations.
//!
//! The reference engine builds its instruction stream at compile time via
//! variadic template "stack" concatenation; this port represents a stream
//! as a plain `Vec<OpCode>` built and concatenated at runtime (see
//! DESIGN.md for the tradeoff). Semantics are identical: executing a
//! stream as a stack machine must leave exactly one value on top.

/// One instruction in a postfix expression stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Var,
    Sum,
    Diff,
    Mul,
    Div,
    Fma,
    Fam,
    MatMul { transpose_left: bool, transpose_right: bool },
    Conv1d,
    Conv2d,
    Relu,
    Transpose,
    Exp,
    Log,
    FlipSign,
    Sqrt,
    Flatten,
    Indexer,
    Shared,
}

impl OpCode {
    /// True if this op is not a lane-local element-wise op: its result must
    /// be materialized into a real tensor before any consumer can address
    /// it, and it appears to the interpreter only as a single [`OpCode::Var`].
    pub fn needs_temporary(&self) -> bool {
        matches!(
            self,
            OpCode::MatMul { .. }
                | OpCode::Conv1d
                | OpCode::Conv2d
                | OpCode::Transpose
                | OpCode::Flatten
                | OpCode::Indexer
                | OpCode::Shared
        )
    }

    /// Number of operands this op pops off the interpreter's register stack.
    pub fn arity(&self) -> usize {
        match self {
            OpCode::Var => 0,
            OpCode::Sum | OpCode::Diff | OpCode::Mul | OpCode::Div => 2,
            OpCode::Fma | OpCode::Fam => 3,
            OpCode::Relu | OpCode::Exp | OpCode::Log | OpCode::FlipSign | OpCode::Sqrt => 1,
            OpCode::MatMul { .. }
            | OpCode::Conv1d
            | OpCode::Conv2d
            | OpCode::Transpose
            | OpCode::Flatten
            | OpCode::Indexer
            | OpCode::Shared => 0, // collapsed to Var by needs_temporary; never interpreted directly
        }
    }
}

/// A postfix instruction stream. Thin `Vec` wrapper so stream concatenation
/// (`concat`) and opcode counting read the way the spec describes them.
#[derive(Clone, Debug, Default)]
pub struct Stream(pub Vec<OpCode>);

impl Stream {
    pub fn new() -> Self {
        Stream(Vec::new())
    }

    pub fn single(op: OpCode) -> Self {
        Stream(vec![op])
    }

    pub fn push_back(&mut self, op: OpCode) {
        self.0.push(op);
    }

    pub fn push_front(&mut self, op: OpCode) {
        self.0.insert(0, op);
    }

    pub fn pop_front(&mut self) -> Option<OpCode> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    pub fn concat(mut a: Stream, b: Stream) -> Stream {
        a.0.extend(b.0);
        a
    }

    /// Count occurrences of `op` in the stream, matching by discriminant
    /// (ignores `MatMul`'s transpose-flag payload).
    pub fn count(&self, op: &OpCode) -> usize {
        self.0
            .iter()
            .filter(|o| std::mem::discriminant(*o) == std::mem::discriminant(op))
            .count()
    }

    pub fn as_slice(&self) -> &[OpCode] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_temporary_classification() {
        assert!(!OpCode::Sum.needs_temporary());
        assert!(!OpCode::Relu.needs_temporary());
        assert!(OpCode::MatMul { transpose_left: false, transpose_right: false }.needs_temporary());
        assert!(OpCode::Flatten.needs_temporary());
        assert!(OpCode::Indexer.needs_temporary());
        assert!(OpCode::Shared.needs_temporary());
    }

    #[test]
    fn concat_and_count() {
        let a = Stream(vec![OpCode::Var, OpCode::Var]);
        let b = Stream(vec![OpCode::Mul]);
        let s = Stream::concat(a, b);
        assert_eq!(s.count(&OpCode::Var), 2);
        assert_eq!(s.as_slice(), &[OpCode::Var, OpCode::Var, OpCode::Mul]);
    }
}
