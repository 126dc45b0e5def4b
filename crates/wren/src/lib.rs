//! # wren
//!
//! A small numerical computing library: dense tensors, expression graphs
//! with reverse-mode autodiff, optimizers and a training loop.
//!
//! This is the facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use wren::prelude::*;
//!
//! # fn main() -> wren::Result<()> {
//! let mut g = Graph::new();
//! let x = g.placeholder();
//! let w = g.variable(Tensor::ones((2, 1)));
//! let y = g.matmul(x, w);
//!
//! let mut model = Model::new(g, x, y);
//! let out = model.predict(&Tensor::ones((3, 2)))?;
//! assert_eq!(out.to_vec(), vec![2.0; 3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `wren-core` | Tensor, Shape, allocators, Gemm kernel contract, text persistence |
//! | `wren-graph` | Graph, Session, autodiff, recurrence, variable checkpoints |
//! | `wren-optim` | Optimizers (SGD, Adam, Adagrad, RMSprop) |
//!
//! ## Modules
//!
//! - [`loss`]: loss builders for [`Model::compile`]
//! - [`model`]: `Model`, `CompiledModel`, `fit` and its logs

/// Re-export core types.
pub use wren_core::{
    bail, load_tensor, read_tensor, save_tensor, write_tensor, Allocator, CachedAllocator,
    CheckLevel, CpuGemm, Error, Gemm, Pass, PoolStats, ReduceOp, Result, Shape, Tensor,
    TensorReader, EPSILON,
};

/// Re-export graph types.
pub use wren_graph::{
    checkpoint, unroll, BinaryOp, Graph, HiddenState, Node, NodeId, RecurrentCell, Session,
    SessionConfig, UnaryOp, Unrolled, Variable,
};

/// Re-export optimizers.
pub mod optim {
    pub use wren_optim::*;
}

pub mod loss;
pub mod model;

pub use model::{CompiledModel, EpochLog, FitConfig, History, Model};

/// Convenience prelude: `use wren::prelude::*;`
pub mod prelude {
    pub use crate::loss::{cross_entropy, mean_absolute_error, mean_squared_error};
    pub use crate::model::{CompiledModel, EpochLog, FitConfig, History, Model};
    pub use crate::optim::{Adagrad, Adam, Optimizer, RmsProp, Sgd};
    pub use crate::{
        CachedAllocator, CheckLevel, Graph, HiddenState, NodeId, RecurrentCell, Result, Session,
        SessionConfig, Tensor, Variable,
    };
}
