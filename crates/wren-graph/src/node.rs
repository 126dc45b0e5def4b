// Graph nodes
//
// A graph is an arena of nodes addressed by `NodeId`. There are five kinds:
//
//   Variable     owned data plus a gradient accumulator of the same shape
//   Placeholder  an input slot; a Session binds a tensor to it per run
//   Constant     a fixed tensor, never differentiated
//   Unary        op(input)
//   Binary       op(lhs, rhs)
//
// Operator nodes refer to their children by id. A child is always pushed
// before its parent, so ids grow along every path from leaf to root.

use std::fmt;

use wren_core::{Error, Result, Tensor};

use crate::ops::{BinaryOp, UnaryOp};

/// Index of a node inside its [`Graph`](crate::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A trainable (or stateful) tensor with its gradient accumulator.
#[derive(Debug, Clone)]
pub struct Variable {
    data: Tensor,
    grad: Tensor,
    trainable: bool,
    stateful: bool,
}

impl Variable {
    /// A trainable, non-stateful variable with a zeroed gradient.
    pub fn new(data: Tensor) -> Self {
        let grad = data.zeros_like();
        Variable {
            data,
            grad,
            trainable: true,
            stateful: false,
        }
    }

    /// Excluded from optimizer updates. Gradients still flow through it.
    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    /// Keeps its gradient across backward sweeps until `zero_grad`.
    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Replace the values. The shape must not change.
    pub fn set_data(&mut self, data: Tensor) -> Result<()> {
        self.data.ensure_same_shape(&data)?;
        self.data = data;
        Ok(())
    }

    /// In-place access to the values, for optimizers.
    pub fn data_mut(&mut self) -> &mut [f32] {
        self.data.data_mut()
    }

    /// Values and gradient together, for update rules that read one while
    /// writing the other.
    pub fn data_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (self.data.data_mut(), self.grad.as_slice())
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub(crate) fn accumulate(&mut self, grad: &Tensor) -> Result<()> {
        self.grad.add_assign(grad)
    }
}

/// One element of the expression graph.
#[derive(Debug, Clone)]
pub enum Node {
    Variable(Variable),
    Placeholder { name: Option<String> },
    Constant(Tensor),
    Unary { op: UnaryOp, input: NodeId },
    Binary { op: BinaryOp, lhs: NodeId, rhs: NodeId },
}

impl Node {
    /// Child ids, left to right.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            Node::Unary { input, .. } => vec![*input],
            Node::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            _ => Vec::new(),
        }
    }

    /// Short label used in diagnostics and numeric-check errors.
    pub fn label(&self) -> String {
        match self {
            Node::Variable(_) => "variable".into(),
            Node::Placeholder { name: Some(n) } => format!("placeholder `{n}`"),
            Node::Placeholder { name: None } => "placeholder".into(),
            Node::Constant(_) => "constant".into(),
            Node::Unary { op, .. } => op.name().into(),
            Node::Binary { op, .. } => op.name().into(),
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Node::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Node::Placeholder { .. })
    }
}

pub(crate) fn not_a_variable(id: NodeId) -> Error {
    Error::NotAVariable(id.0)
}
