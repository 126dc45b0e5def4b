// Session: executes a graph
//
// A session owns everything that changes per run and nothing that describes
// the model:
//
//   bindings   placeholder -> tensor, kept until rebound or unbound
//   values     forward output of every node evaluated by the last run
//
// `run` clears `values` and evaluates everything under the requested roots
// from scratch. A node reached along several paths is evaluated once. The
// values stay available for `backward` until the next run or
// `release_values`.
//
// Sessions are plain values: build one per model or per thread. Nothing here
// is global.

use std::collections::HashMap;
use std::sync::Arc;

use wren_core::{Allocator, CheckLevel, CpuGemm, Error, Gemm, Pass, Result, Tensor};

use crate::backprop;
use crate::graph::Graph;
use crate::node::{Node, NodeId};

/// Execution settings shared by every run of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// NaN/Inf checking for forward outputs and gradients.
    pub check: CheckLevel,
    /// Allocator for tensors the session creates itself (seeds).
    pub allocator: Allocator,
    /// Matrix-multiply kernel for forward and backward matmuls.
    pub kernel: Arc<dyn Gemm>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check: CheckLevel::default(),
            allocator: Allocator::default(),
            kernel: Arc::new(CpuGemm),
        }
    }
}

impl SessionConfig {
    pub fn with_check(mut self, check: CheckLevel) -> Self {
        self.check = check;
        self
    }

    pub fn with_allocator(mut self, allocator: Allocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn Gemm>) -> Self {
        self.kernel = kernel;
        self
    }
}

/// Placeholder bindings plus the memoized values of the last run.
#[derive(Debug, Default)]
pub struct Session {
    config: SessionConfig,
    bindings: HashMap<NodeId, Tensor>,
    values: HashMap<NodeId, Tensor>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            bindings: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // Bindings

    fn ensure_placeholder(graph: &Graph, id: NodeId) -> Result<()> {
        if graph.node(id)?.is_placeholder() {
            Ok(())
        } else {
            Err(Error::NotAPlaceholder(id.index()))
        }
    }

    /// Bind `value` to a free placeholder.
    pub fn bind(&mut self, graph: &Graph, placeholder: NodeId, value: Tensor) -> Result<()> {
        Self::ensure_placeholder(graph, placeholder)?;
        if self.bindings.contains_key(&placeholder) {
            return Err(Error::PlaceholderAlreadyBound(placeholder.index()));
        }
        self.bindings.insert(placeholder, value);
        Ok(())
    }

    /// Bind `value`, replacing any previous binding.
    pub fn rebind(&mut self, graph: &Graph, placeholder: NodeId, value: Tensor) -> Result<()> {
        Self::ensure_placeholder(graph, placeholder)?;
        self.bindings.insert(placeholder, value);
        Ok(())
    }

    pub fn unbind(&mut self, placeholder: NodeId) -> Option<Tensor> {
        self.bindings.remove(&placeholder)
    }

    pub fn is_bound(&self, placeholder: NodeId) -> bool {
        self.bindings.contains_key(&placeholder)
    }

    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    // Forward

    /// Evaluate `root` from scratch and return its value.
    pub fn run(&mut self, graph: &Graph, root: NodeId) -> Result<Tensor> {
        let mut out = self.run_all(graph, &[root])?;
        Ok(out.swap_remove(0))
    }

    /// Evaluate several roots in one run, sharing common sub-expressions.
    pub fn run_all(&mut self, graph: &Graph, roots: &[NodeId]) -> Result<Vec<Tensor>> {
        self.values.clear();
        for id in graph.topo_order(roots)? {
            let value = self.evaluate(graph, id)?;
            self.values.insert(id, value);
        }
        roots
            .iter()
            .map(|id| self.value(*id).cloned().ok_or(Error::NotEvaluated(id.index())))
            .collect()
    }

    fn input(&self, id: NodeId) -> Result<&Tensor> {
        self.values.get(&id).ok_or(Error::NotEvaluated(id.index()))
    }

    fn evaluate(&self, graph: &Graph, id: NodeId) -> Result<Tensor> {
        let check = self.config.check;
        match graph.node(id)? {
            Node::Variable(v) => Ok(v.data().clone()),
            Node::Constant(t) => Ok(t.clone()),
            Node::Placeholder { name } => {
                self.bindings
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::UnboundPlaceholder {
                        id: id.index(),
                        name: name.clone().unwrap_or_else(|| "unnamed".into()),
                    })
            }
            Node::Unary { op, input } => {
                let out = op.forward(self.input(*input)?)?;
                check.ensure_finite(&out, op.name(), Pass::Forward)?;
                Ok(out)
            }
            Node::Binary { op, lhs, rhs } => {
                let out = op.forward(
                    self.input(*lhs)?,
                    self.input(*rhs)?,
                    self.config.kernel.as_ref(),
                )?;
                check.ensure_finite(&out, op.name(), Pass::Forward)?;
                Ok(out)
            }
        }
    }

    /// Value of `id` from the last run.
    pub fn value(&self, id: NodeId) -> Option<&Tensor> {
        self.values.get(&id)
    }

    /// Drop the memoized values of the last run.
    ///
    /// Variable data is shared with the memo until then, so in-place updates
    /// after a release do not copy.
    pub fn release_values(&mut self) {
        self.values.clear();
    }

    // Backward

    /// Ones shaped like the last value of `root`, from the session allocator.
    pub fn ones_seed(&self, root: NodeId) -> Result<Tensor> {
        let value = self.input(root)?;
        Ok(Tensor::full_in(
            value.shape().clone(),
            1.0,
            &self.config.allocator,
        ))
    }

    /// Propagate `seed` from `root` into the accumulators of every variable
    /// under it. `root` must have been evaluated by the last run.
    pub fn backward(&mut self, graph: &mut Graph, root: NodeId, seed: &Tensor) -> Result<()> {
        backprop::backward(self, graph, root, seed)
    }
}
