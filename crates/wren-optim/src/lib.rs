//! # wren-optim
//!
//! Gradient-based optimizers for wren graphs.
//!
//! Every optimizer implements [`Optimizer`]. One call to
//! [`Optimizer::step`] runs a whole training step against a loss node:
//!
//!   forward -> backward -> update trainable variables -> clear gradients
//!
//! Update rules only see one variable at a time. The gradient they receive
//! is the raw accumulator; every rule multiplies its learning rate by
//! `grad_scale` (1 / batch size).
//!
//! - [`Sgd`]: plain, momentum and Nesterov gradient descent with decay
//! - [`Adam`]: bias-corrected first and second moments
//! - [`Adagrad`]: per-element learning rates from accumulated squares
//! - [`RmsProp`]: moving average of squared gradients

pub mod adagrad;
pub mod adam;
pub mod rmsprop;
pub mod sgd;
mod slots;

pub use adagrad::{Adagrad, AdagradConfig};
pub use adam::{Adam, AdamConfig};
pub use rmsprop::{RmsProp, RmsPropConfig};
pub use sgd::{Sgd, SgdConfig};

use wren_core::{Error, Result};
use wren_graph::{Graph, NodeId, Session, Variable};

/// A rule that turns accumulated gradients into variable updates.
pub trait Optimizer {
    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Called once per step, before the first `update`.
    fn begin_step(&mut self) {}

    /// Update one trainable variable from its accumulated gradient.
    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()>;

    /// One training step on `loss`. Returns the loss value before the update.
    ///
    /// Fails with `NotAScalar` unless the loss evaluates to a single value.
    fn step(
        &mut self,
        session: &mut Session,
        graph: &mut Graph,
        loss: NodeId,
        batch_size: usize,
    ) -> Result<f32> {
        if batch_size == 0 {
            return Err(Error::msg("batch size must be positive"));
        }
        let value = session.run(graph, loss)?.as_scalar()?;
        let seed = session.ones_seed(loss)?;
        session.backward(graph, loss, &seed)?;
        // The memo shares buffers with variable data.
        session.release_values();

        let grad_scale = 1.0 / batch_size as f32;
        self.begin_step();
        for id in graph.variables_under(loss)? {
            let var = graph.get_variable_mut(id)?;
            if var.is_trainable() {
                self.update(id, var, grad_scale)?;
            }
        }
        graph.clear_gradients(loss)?;
        Ok(value)
    }
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn learning_rate(&self) -> f32 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        (**self).set_learning_rate(learning_rate)
    }

    fn begin_step(&mut self) {
        (**self).begin_step()
    }

    fn update(&mut self, id: NodeId, var: &mut Variable, grad_scale: f32) -> Result<()> {
        (**self).update(id, var, grad_scale)
    }
}
