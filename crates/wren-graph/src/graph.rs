// Graph: arena of expression nodes
//
// Building an expression only pushes nodes; nothing is computed until a
// Session runs it. Shapes are therefore unchecked here and surface as errors
// at the first run.
//
//   let mut g = Graph::new();
//   let x = g.placeholder();
//   let w = g.variable(Tensor::ones((3, 1)));
//   let y = g.matmul(x, w);
//   let loss = g.mean(y);
//
// Children are always pushed before their parents, so ascending id order is
// a topological order. Traversals rely on this instead of recursing.

use std::collections::BTreeSet;

use wren_core::{Error, ReduceOp, Result, Tensor};

use crate::node::{not_a_variable, Node, NodeId, Variable};
use crate::ops::{BinaryOp, UnaryOp};

/// Arena of nodes addressed by [`NodeId`].
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::UnknownNode(id.0))
    }

    // Leaves

    /// A trainable variable initialised with `data`.
    pub fn variable(&mut self, data: Tensor) -> NodeId {
        self.push(Node::Variable(Variable::new(data)))
    }

    /// A variable with explicit flags, see [`Variable::frozen`] and
    /// [`Variable::stateful`].
    pub fn add_variable(&mut self, var: Variable) -> NodeId {
        self.push(Node::Variable(var))
    }

    pub fn placeholder(&mut self) -> NodeId {
        self.push(Node::Placeholder { name: None })
    }

    pub fn named_placeholder(&mut self, name: impl Into<String>) -> NodeId {
        self.push(Node::Placeholder {
            name: Some(name.into()),
        })
    }

    pub fn constant(&mut self, value: Tensor) -> NodeId {
        self.push(Node::Constant(value))
    }

    /// A `[1]` constant, broadcast against anything.
    pub fn scalar(&mut self, value: f32) -> NodeId {
        self.constant(Tensor::scalar(value))
    }

    // Operators

    pub fn unary(&mut self, op: UnaryOp, input: NodeId) -> NodeId {
        self.push(Node::Unary { op, input })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.push(Node::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(BinaryOp::Sub, a, b)
    }

    /// Elementwise (Hadamard) product.
    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn matmul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.binary(BinaryOp::MatMul, a, b)
    }

    /// `x * factor` through a scalar constant.
    pub fn scale(&mut self, x: NodeId, factor: f32) -> NodeId {
        let c = self.scalar(factor);
        self.mul(x, c)
    }

    pub fn neg(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn exp(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Log, x)
    }

    pub fn sqrt(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Sqrt, x)
    }

    pub fn square(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Square, x)
    }

    pub fn abs(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Abs, x)
    }

    pub fn sigmoid(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn tanh(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn relu(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Relu, x)
    }

    pub fn leaky_relu(&mut self, x: NodeId, factor: f32) -> NodeId {
        self.unary(UnaryOp::LeakyRelu(factor), x)
    }

    /// Softmax over the last axis. Its gradient is the diagonal
    /// approximation described in [`crate::ops`].
    pub fn softmax(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Softmax, x)
    }

    pub fn reduce(&mut self, x: NodeId, op: ReduceOp, axis: Option<usize>, keep_dim: bool) -> NodeId {
        self.unary(UnaryOp::Reduce { op, axis, keep_dim }, x)
    }

    /// Sum of every value, shape `[1]`.
    pub fn sum(&mut self, x: NodeId) -> NodeId {
        self.reduce(x, ReduceOp::Sum, None, false)
    }

    /// Mean of every value, shape `[1]`.
    pub fn mean(&mut self, x: NodeId) -> NodeId {
        self.reduce(x, ReduceOp::Mean, None, false)
    }

    pub fn reshape(&mut self, x: NodeId, dims: Vec<usize>) -> NodeId {
        self.unary(
            UnaryOp::Reshape {
                dims,
                include_batch: false,
            },
            x,
        )
    }

    /// Reshape every sample: the leading (batch) dim is kept as is.
    pub fn reshape_batch(&mut self, x: NodeId, dims: Vec<usize>) -> NodeId {
        self.unary(
            UnaryOp::Reshape {
                dims,
                include_batch: true,
            },
            x,
        )
    }

    pub fn flatten(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Flatten, x)
    }

    pub fn transpose(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Transpose, x)
    }

    pub fn clip(&mut self, x: NodeId, min: f32, max: f32) -> NodeId {
        self.unary(UnaryOp::Clip { min, max }, x)
    }

    pub fn identity(&mut self, x: NodeId) -> NodeId {
        self.unary(UnaryOp::Identity, x)
    }

    /// Fused softmax + cross-entropy of `logits` against `target`.
    pub fn softmax_cross_entropy(
        &mut self,
        target: NodeId,
        logits: NodeId,
        label_smoothing: f32,
    ) -> NodeId {
        self.binary(
            BinaryOp::SoftmaxCrossEntropy { label_smoothing },
            target,
            logits,
        )
    }

    // Variables

    pub fn get_variable(&self, id: NodeId) -> Result<&Variable> {
        self.node(id)?.as_variable().ok_or(not_a_variable(id))
    }

    pub fn get_variable_mut(&mut self, id: NodeId) -> Result<&mut Variable> {
        match self.node_mut(id)? {
            Node::Variable(v) => Ok(v),
            _ => Err(not_a_variable(id)),
        }
    }

    /// Every variable in the graph, in id order.
    pub fn variables(&self) -> impl Iterator<Item = (NodeId, &Variable)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_variable().map(|v| (NodeId(i), v)))
    }

    /// Variables `root` depends on, in id order.
    pub fn variables_under(&self, root: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .topo_order(&[root])?
            .into_iter()
            .filter(|&id| matches!(self.nodes[id.0], Node::Variable(_)))
            .collect())
    }

    /// Set the trainable flag of every variable under `root`.
    pub fn make_trainable(&mut self, root: NodeId, trainable: bool) -> Result<()> {
        for id in self.variables_under(root)? {
            self.get_variable_mut(id)?.set_trainable(trainable);
        }
        Ok(())
    }

    /// Zero one variable's accumulator (the reset for stateful variables).
    pub fn reset_gradient(&mut self, id: NodeId) -> Result<()> {
        self.get_variable_mut(id)?.zero_grad();
        Ok(())
    }

    /// Zero the accumulators of non-stateful variables under `root`.
    pub fn clear_gradients(&mut self, root: NodeId) -> Result<()> {
        for id in self.variables_under(root)? {
            let v = self.get_variable_mut(id)?;
            if !v.is_stateful() {
                v.zero_grad();
            }
        }
        Ok(())
    }

    // Traversal

    /// Every node reachable from `roots`, children before parents.
    pub fn topo_order(&self, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.node(id)?.inputs());
            }
        }
        Ok(seen.into_iter().collect())
    }
}
