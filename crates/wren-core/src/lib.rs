//! # wren-core
//!
//! Dense tensors and the pieces underneath them:
//! - [`Tensor`]: row-major `f32` array with copy-on-write value semantics
//! - [`Shape`]: dimensions, strides and broadcasting rules
//! - [`Allocator`] / [`CachedAllocator`]: heap, small-buffer and pooled storage
//! - [`Gemm`]: the matrix-multiply kernel contract, with [`CpuGemm`]
//! - [`CheckLevel`]: runtime NaN/Inf checking
//! - [`io`]: the text persistence format
//! - [`Error`] / [`Result`]: the error type shared by every wren crate

pub mod alloc;
pub mod check;
pub mod error;
pub mod init;
pub mod io;
pub mod kernel;
pub mod shape;
pub mod tensor;

pub use alloc::{Allocator, CachedAllocator, PoolStats, INLINE_CAPACITY};
pub use check::CheckLevel;
pub use error::{Error, Pass, Result};
pub use io::{load_tensor, read_tensor, save_tensor, write_tensor, TensorReader};
pub use kernel::{CpuGemm, Gemm};
pub use shape::Shape;
pub use tensor::{ReduceOp, Tensor};

/// Floor applied to probabilities before taking logarithms in losses.
pub const EPSILON: f32 = 1e-8;
