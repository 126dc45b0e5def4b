// Backpropagation: reverse-mode sweep over a graph
//
//   1. The session's last run holds the forward value of every node under
//      the root, keyed by NodeId.
//   2. Non-stateful variables under the root get their accumulators zeroed.
//   3. Starting from grad(root) = seed, nodes are visited in descending id
//      order (reverse topological). Each operator turns its output gradient
//      into input gradients with its backward rule.
//   4. Gradients reaching a variable are added to its accumulator.
//      Placeholders and constants are sinks.
//
// ACCUMULATION: a node used by several parents receives the sum of their
// contributions (multivariate chain rule). c = a * a gives dc/da = 2a.

use std::collections::HashMap;

use wren_core::{Error, Pass, Result, Tensor};

use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::ops::{BinaryOp, UnaryOp};
use crate::session::Session;

/// Gradients of intermediate nodes during one sweep.
#[derive(Debug, Default)]
pub struct GradStore {
    grads: HashMap<NodeId, Tensor>,
}

impl GradStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    fn take(&mut self, id: NodeId) -> Option<Tensor> {
        self.grads.remove(&id)
    }

    /// Add `grad` to whatever `id` has received so far.
    pub fn accumulate(&mut self, id: NodeId, grad: Tensor) -> Result<()> {
        match self.grads.get_mut(&id) {
            Some(existing) => existing.add_assign(&grad),
            None => {
                self.grads.insert(id, grad);
                Ok(())
            }
        }
    }
}

// What a node needs from the sweep, detached from the graph borrow.
enum Step {
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Variable,
    Sink,
}

fn forward_value(session: &Session, id: NodeId) -> Result<&Tensor> {
    session.value(id).ok_or(Error::NotEvaluated(id.index()))
}

pub(crate) fn backward(
    session: &Session,
    graph: &mut Graph,
    root: NodeId,
    seed: &Tensor,
) -> Result<()> {
    forward_value(session, root)?.ensure_same_shape(seed)?;
    let check = session.config().check;
    let kernel = session.config().kernel.clone();

    let order = graph.topo_order(&[root])?;
    graph.clear_gradients(root)?;

    let mut grads = GradStore::new();
    grads.accumulate(root, seed.clone())?;

    for &id in order.iter().rev() {
        let Some(grad) = grads.take(id) else {
            continue;
        };
        let node = graph.node(id)?;
        check.ensure_finite(&grad, &node.label(), Pass::Backward)?;

        let step = match node {
            Node::Unary { op, input } => Step::Unary(op.clone(), *input),
            Node::Binary { op, lhs, rhs } => Step::Binary(op.clone(), *lhs, *rhs),
            Node::Variable(_) => Step::Variable,
            Node::Placeholder { .. } | Node::Constant(_) => Step::Sink,
        };

        match step {
            Step::Unary(op, input) => {
                let x = forward_value(session, input)?;
                let y = forward_value(session, id)?;
                grads.accumulate(input, op.backward(x, y, &grad)?)?;
            }
            Step::Binary(op, lhs, rhs) => {
                let a = forward_value(session, lhs)?;
                let b = forward_value(session, rhs)?;
                let (da, db) = op.backward(a, b, &grad, kernel.as_ref())?;
                grads.accumulate(lhs, da)?;
                grads.accumulate(rhs, db)?;
            }
            Step::Variable => graph.get_variable_mut(id)?.accumulate(&grad)?,
            Step::Sink => {}
        }
    }
    Ok(())
}
