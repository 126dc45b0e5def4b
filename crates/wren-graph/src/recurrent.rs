// Recurrence without graph mutation
//
// Two ways to run a recurrent computation:
//
// STEPPING (inference, streaming): a `RecurrentCell` is one time step of a
// graph. Its state inputs are placeholders and its next-state outputs are
// ordinary expressions. `step` binds x_t and h_{t-1}, evaluates the output
// and every next state in one run, and hands h_t back as a `HiddenState`
// value. The graph never changes between steps.
//
// UNROLLING (training): `unroll` replicates the step body once per time
// step. Variables captured by the body are shared by every copy, so
// backpropagating from a loss over the outputs is backprop-through-time.
//
// Gradients reaching a state placeholder stop there, like any placeholder.

use wren_core::{Error, Result, Tensor};

use crate::graph::Graph;
use crate::node::NodeId;
use crate::session::Session;

/// Hidden state carried from one step call to the next.
#[derive(Debug, Clone, Default)]
pub struct HiddenState {
    values: Vec<Tensor>,
}

impl HiddenState {
    pub fn new(values: Vec<Tensor>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Tensor] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Tensor> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A state placeholder and the expression producing its next value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSlot {
    pub previous: NodeId,
    pub next: NodeId,
}

/// One time step of a recurrent graph.
#[derive(Debug, Clone)]
pub struct RecurrentCell {
    input: NodeId,
    output: NodeId,
    states: Vec<StateSlot>,
}

impl RecurrentCell {
    pub fn new(input: NodeId, output: NodeId) -> Self {
        Self {
            input,
            output,
            states: Vec::new(),
        }
    }

    /// Register a state: `previous` is a placeholder read by the step,
    /// `next` the expression that becomes its value for the following step.
    pub fn with_state(mut self, previous: NodeId, next: NodeId) -> Self {
        self.states.push(StateSlot { previous, next });
        self
    }

    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn states(&self) -> &[StateSlot] {
        &self.states
    }

    /// Run one step and advance `state` in place. Returns the step output.
    pub fn step(
        &self,
        session: &mut Session,
        graph: &Graph,
        x: &Tensor,
        state: &mut HiddenState,
    ) -> Result<Tensor> {
        if state.len() != self.states.len() {
            return Err(Error::msg(format!(
                "recurrent cell has {} states, got {}",
                self.states.len(),
                state.len()
            )));
        }
        session.rebind(graph, self.input, x.clone())?;
        for (slot, value) in self.states.iter().zip(&state.values) {
            session.rebind(graph, slot.previous, value.clone())?;
        }

        let mut roots = Vec::with_capacity(self.states.len() + 1);
        roots.push(self.output);
        roots.extend(self.states.iter().map(|s| s.next));
        let mut values = session.run_all(graph, &roots)?;

        let output = values.remove(0);
        state.values = values;
        Ok(output)
    }

    /// Step through `inputs` in order, returning every output.
    pub fn run_sequence(
        &self,
        session: &mut Session,
        graph: &Graph,
        inputs: &[Tensor],
        state: &mut HiddenState,
    ) -> Result<Vec<Tensor>> {
        inputs
            .iter()
            .map(|x| self.step(session, graph, x, state))
            .collect()
    }
}

/// Node ids of an unrolled recurrence.
#[derive(Debug, Clone)]
pub struct Unrolled {
    /// One input placeholder per time step.
    pub inputs: Vec<NodeId>,
    /// One output per time step.
    pub outputs: Vec<NodeId>,
    /// State expressions after the last step.
    pub final_state: Vec<NodeId>,
}

/// Replicate `body` over `steps` time steps.
///
/// `body(graph, x_t, state)` returns `(output_t, next_state)`. The first call
/// sees `initial_state`. Every call must return as many states as it got.
pub fn unroll<F>(
    graph: &mut Graph,
    steps: usize,
    initial_state: &[NodeId],
    mut body: F,
) -> Result<Unrolled>
where
    F: FnMut(&mut Graph, NodeId, &[NodeId]) -> (NodeId, Vec<NodeId>),
{
    let mut state = initial_state.to_vec();
    let mut inputs = Vec::with_capacity(steps);
    let mut outputs = Vec::with_capacity(steps);
    for t in 0..steps {
        let x = graph.named_placeholder(format!("x_{t}"));
        let (output, next) = body(graph, x, &state);
        if next.len() != state.len() {
            return Err(Error::msg(format!(
                "step {t} returned {} states, expected {}",
                next.len(),
                state.len()
            )));
        }
        inputs.push(x);
        outputs.push(output);
        state = next;
    }
    Ok(Unrolled {
        inputs,
        outputs,
        final_state: state,
    })
}
