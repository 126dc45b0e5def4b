//! # wren-graph
//!
//! Expression graphs and reverse-mode automatic differentiation.
//!
//! - [`Graph`]: arena of nodes; builder methods only record structure
//! - [`Node`] / [`Variable`]: the leaves and operators of a graph
//! - [`UnaryOp`] / [`BinaryOp`]: operator tags with forward and backward rules
//! - [`Session`]: binds placeholders, evaluates, and runs backward sweeps
//! - [`RecurrentCell`] / [`unroll`]: recurrence as stepping or unrolling
//! - [`checkpoint`]: variable save/restore

pub mod backprop;
pub mod checkpoint;
pub mod graph;
pub mod node;
pub mod ops;
pub mod recurrent;
pub mod session;

pub use backprop::GradStore;
pub use graph::Graph;
pub use node::{Node, NodeId, Variable};
pub use ops::{sum_to_shape, BinaryOp, UnaryOp};
pub use recurrent::{unroll, HiddenState, RecurrentCell, StateSlot, Unrolled};
pub use session::{Session, SessionConfig};
