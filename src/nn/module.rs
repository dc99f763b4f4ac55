//! Module: holds trainable variables, forward builds an expression graph.
//! Layer/model types compose `Module`.

use crate::expr::ExprNode;
use crate::variable::Variable;

/// A layer or model: owns its trainable [`Variable`]s and knows how to
/// extend an [`ExprNode`] graph with its own operation(s).
pub trait Module {
    /// All trainable variables, in a fixed order matching how the optimizer
    /// should index per-variable state (e.g. momentum/Adam moments).
    fn parameters(&self) -> Vec<&Variable>;

    /// Build this module's contribution to the expression graph, consuming
    /// `input` and returning the new root.
    fn forward(&self, input: ExprNode) -> ExprNode;
}
