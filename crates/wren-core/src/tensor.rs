use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::alloc::{Allocator, Buffer};
use crate::error::{Error, Result};
use crate::kernel::{CpuGemm, Gemm};
use crate::shape::{BroadcastIndex, Shape};

// Tensor: dense f32 array with value semantics
//
// A tensor is a shape plus one contiguous row-major buffer.
//
// MEMORY MODEL:
//
//   The buffer sits behind an Arc. Cloning a tensor is O(1) and shares the
//   buffer. Every mutating method goes through `data_mut`, which copies the
//   buffer first if anyone else still holds it (copy-on-write). Shared
//   buffers are therefore never observably aliased: a clone behaves like an
//   independent value. `deep_copy` always allocates a new buffer.
//
//   `reshape` is a view: same buffer, new shape.
//
// ALLOCATION:
//
//   Results of an operation are allocated through the allocator of the left
//   (or only) operand, so a graph fed with pooled tensors keeps drawing from
//   the same pool.

/// Output sizes from which elementwise loops run on the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 1 << 14;

/// Dense N-dimensional array of `f32`.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    buffer: Arc<Buffer>,
}

/// Reduction kinds for [`Tensor::reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

impl ReduceOp {
    fn init(self) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => 0.0,
            ReduceOp::Max => f32::NEG_INFINITY,
            ReduceOp::Min => f32::INFINITY,
        }
    }

    #[inline]
    fn combine(self, acc: f32, v: f32) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => acc + v,
            ReduceOp::Max => acc.max(v),
            ReduceOp::Min => acc.min(v),
        }
    }

    fn finish(self, acc: f32, count: usize) -> f32 {
        match self {
            ReduceOp::Mean => acc / count as f32,
            _ => acc,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }
}

/// Write `f(i)` into every slot, in parallel for large outputs.
fn fill_indexed<F>(out: &mut [f32], f: F)
where
    F: Fn(usize) -> f32 + Sync + Send,
{
    if out.len() >= PARALLEL_THRESHOLD {
        out.par_iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
    } else {
        out.iter_mut().enumerate().for_each(|(i, o)| *o = f(i));
    }
}

impl Tensor {
    // Construction

    fn from_buffer(shape: Shape, buffer: Buffer) -> Self {
        Tensor {
            shape,
            buffer: Arc::new(buffer),
        }
    }

    /// Build a tensor from row-major values on the heap.
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>) -> Result<Self> {
        Self::from_vec_in(data, shape, &Allocator::Heap)
    }

    pub fn from_vec_in(data: Vec<f32>, shape: impl Into<Shape>, alloc: &Allocator) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Self::from_buffer(shape, alloc.adopt(data)))
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::zeros_in(shape, &Allocator::Heap)
    }

    pub fn zeros_in(shape: impl Into<Shape>, alloc: &Allocator) -> Self {
        let shape = shape.into();
        let buffer = alloc.zeroed(shape.elem_count());
        Self::from_buffer(shape, buffer)
    }

    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn full(shape: impl Into<Shape>, value: f32) -> Self {
        Self::full_in(shape, value, &Allocator::Heap)
    }

    pub fn full_in(shape: impl Into<Shape>, value: f32, alloc: &Allocator) -> Self {
        let mut t = Self::zeros_in(shape, alloc);
        if value != 0.0 {
            t.fill(value);
        }
        t
    }

    /// One value with shape `[1]`.
    pub fn scalar(value: f32) -> Self {
        Self::full(1, value)
    }

    /// Zeros with this tensor's shape and allocator.
    pub fn zeros_like(&self) -> Self {
        Self::zeros_in(self.shape.clone(), &self.allocator())
    }

    pub fn ones_like(&self) -> Self {
        Self::full_in(self.shape.clone(), 1.0, &self.allocator())
    }

    /// A new tensor of `shape` whose values are produced by `f(flat_index)`.
    fn generate<F>(shape: Shape, alloc: &Allocator, f: F) -> Self
    where
        F: Fn(usize) -> f32 + Sync + Send,
    {
        let mut buffer = alloc.zeroed(shape.elem_count());
        fill_indexed(buffer.as_mut_slice(), f);
        Self::from_buffer(shape, buffer)
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// The allocator this tensor's buffer came from.
    pub fn allocator(&self) -> Allocator {
        self.buffer.allocator()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.buffer.as_slice()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.as_slice().to_vec()
    }

    /// Mutable access to the values. Copies the buffer first if it is shared.
    pub fn data_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.buffer).as_mut_slice()
    }

    /// The single value of a one-element tensor.
    pub fn as_scalar(&self) -> Result<f32> {
        match self.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::NotAScalar {
                shape: self.shape.clone(),
            }),
        }
    }

    /// Whether two tensors currently share one buffer.
    pub fn shares_buffer(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// A copy with its own buffer from the same allocator.
    pub fn deep_copy(&self) -> Self {
        self.to_allocator(&self.allocator())
    }

    /// A copy whose buffer comes from `alloc`.
    pub fn to_allocator(&self, alloc: &Allocator) -> Self {
        Self::from_buffer(self.shape.clone(), alloc.copy_of(self.as_slice()))
    }

    pub fn has_non_finite(&self) -> bool {
        self.as_slice().iter().any(|v| !v.is_finite())
    }

    /// Largest absolute elementwise difference. Shapes must match.
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<f32> {
        self.ensure_same_shape(other)?;
        Ok(self
            .as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }

    pub fn ensure_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    // In-place mutation

    pub fn fill(&mut self, value: f32) {
        self.data_mut().fill(value);
    }

    /// `self += other` for tensors of identical shape.
    pub fn add_assign(&mut self, other: &Tensor) -> Result<()> {
        self.ensure_same_shape(other)?;
        let src = other.as_slice();
        let dst = self.data_mut();
        if dst.len() >= PARALLEL_THRESHOLD {
            dst.par_iter_mut().zip(src).for_each(|(d, s)| *d += s);
        } else {
            dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
        }
        Ok(())
    }

    // Elementwise unary

    /// Apply `f` to every value.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let src = self.as_slice();
        Self::generate(self.shape.clone(), &self.allocator(), |i| f(src[i]))
    }

    pub fn neg(&self) -> Tensor {
        self.map(|v| -v)
    }

    pub fn scale(&self, factor: f32) -> Tensor {
        self.map(|v| v * factor)
    }

    pub fn add_scalar(&self, value: f32) -> Tensor {
        self.map(|v| v + value)
    }

    pub fn exp(&self) -> Tensor {
        self.map(f32::exp)
    }

    /// Natural logarithm.
    pub fn ln(&self) -> Tensor {
        self.map(f32::ln)
    }

    pub fn sqrt(&self) -> Tensor {
        self.map(f32::sqrt)
    }

    pub fn square(&self) -> Tensor {
        self.map(|v| v * v)
    }

    pub fn abs(&self) -> Tensor {
        self.map(f32::abs)
    }

    // Elementwise binary with broadcasting

    /// Combine two tensors elementwise after broadcasting them together.
    pub fn zip_broadcast<F>(&self, rhs: &Tensor, f: F) -> Result<Tensor>
    where
        F: Fn(f32, f32) -> f32 + Sync + Send,
    {
        let (l, r) = (self.as_slice(), rhs.as_slice());
        let alloc = self.allocator();
        if self.shape == rhs.shape {
            return Ok(Self::generate(self.shape.clone(), &alloc, |i| {
                f(l[i], r[i])
            }));
        }
        let out = Shape::broadcast_shape(&self.shape, &rhs.shape)?;
        if r.len() == 1 && out == self.shape {
            let rv = r[0];
            return Ok(Self::generate(out, &alloc, |i| f(l[i], rv)));
        }
        let index = BroadcastIndex::new(&self.shape, &rhs.shape, &out);
        Ok(Self::generate(out, &alloc, |i| {
            let (li, ri) = index.offsets(i);
            f(l[li], r[ri])
        }))
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, |a, b| a / b)
    }

    pub fn maximum(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, f32::max)
    }

    /// Materialize this tensor broadcast to `shape`.
    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let target = shape.into();
        let out = Shape::broadcast_shape(&self.shape, &target)?;
        if out != target {
            return Err(Error::BroadcastIncompatible {
                lhs: self.shape.clone(),
                rhs: target,
            });
        }
        if self.shape == target {
            return Ok(self.clone());
        }
        let strides = self.shape.broadcast_strides(&target);
        let dims = target.dims().to_vec();
        let src = self.as_slice();
        Ok(Self::generate(target, &self.allocator(), |mut i| {
            let mut off = 0;
            for d in (0..dims.len()).rev() {
                off += (i % dims[d]) * strides[d];
                i /= dims[d];
            }
            src[off]
        }))
    }

    // Reductions

    /// Reduce along `axis`, or over every value when `axis` is `None`.
    ///
    /// A global reduction yields shape `[1]`, or all-ones of the same rank with
    /// `keep_dim`. Reducing the only axis of a vector also yields `[1]`.
    pub fn reduce(&self, op: ReduceOp, axis: Option<usize>, keep_dim: bool) -> Result<Tensor> {
        let alloc = self.allocator();
        let Some(axis) = axis else {
            let src = self.as_slice();
            let acc = src.iter().fold(op.init(), |a, &v| op.combine(a, v));
            let shape = if keep_dim && self.rank() > 0 {
                Shape::new(vec![1; self.rank()])
            } else {
                Shape::from(1)
            };
            return Ok(Self::full_in(shape, op.finish(acc, src.len()), &alloc));
        };

        let (_, len, inner) = self.shape.split_at_axis(axis)?;
        let mut shape = self.shape.reduced(axis, keep_dim)?;
        if shape.rank() == 0 {
            shape = Shape::from(1);
        }
        let src = self.as_slice();
        Ok(Self::generate(shape, &alloc, |j| {
            let (o, i) = (j / inner, j % inner);
            let acc = (0..len).fold(op.init(), |a, k| {
                op.combine(a, src[(o * len + k) * inner + i])
            });
            op.finish(acc, len)
        }))
    }

    pub fn sum_all(&self) -> f32 {
        self.as_slice().iter().sum()
    }

    pub fn mean_all(&self) -> f32 {
        self.sum_all() / self.elem_count() as f32
    }

    // Views and layout

    /// Same buffer, new shape. Element counts must agree.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        Ok(Tensor {
            shape,
            buffer: Arc::clone(&self.buffer),
        })
    }

    fn matrix_dims(&self) -> Result<(usize, usize)> {
        match *self.dims() {
            [rows, cols] => Ok((rows, cols)),
            _ => Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            }),
        }
    }

    /// Transpose of a rank-2 tensor.
    pub fn transpose(&self) -> Result<Tensor> {
        let (rows, cols) = self.matrix_dims()?;
        let src = self.as_slice();
        Ok(Self::generate(
            Shape::from((cols, rows)),
            &self.allocator(),
            |i| {
                let (c, r) = (i / rows, i % rows);
                src[r * cols + c]
            },
        ))
    }

    /// `len` rows starting at `start` along axis 0.
    pub fn slice_rows(&self, start: usize, len: usize) -> Result<Tensor> {
        let rows = self.shape.dim(0)?;
        if start + len > rows {
            return Err(Error::SliceOutOfBounds { start, len, rows });
        }
        let row = self.elem_count() / rows.max(1);
        let mut dims = self.dims().to_vec();
        dims[0] = len;
        let src = &self.as_slice()[start * row..(start + len) * row];
        Ok(Self::from_buffer(
            Shape::new(dims),
            self.allocator().copy_of(src),
        ))
    }

    /// Numerically stable softmax over the last axis.
    pub fn softmax(&self) -> Result<Tensor> {
        let width = *self.dims().last().ok_or(Error::RankMismatch {
            expected: 1,
            got: 0,
        })?;
        let mut out = self.deep_copy();
        let rows = out.data_mut().chunks_mut(width.max(1));
        for row in rows {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                total += *v;
            }
            row.iter_mut().for_each(|v| *v /= total);
        }
        Ok(out)
    }

    // Matrix multiply

    /// Rank-2 matrix product with the built-in CPU kernel.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.matmul_with(rhs, &CpuGemm)
    }

    /// Rank-2 matrix product through `kernel`.
    pub fn matmul_with(&self, rhs: &Tensor, kernel: &dyn Gemm) -> Result<Tensor> {
        let (m, k1) = self.matrix_dims()?;
        let (k2, n) = rhs.matrix_dims()?;
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let mut out = Tensor::zeros_in((m, n), &self.allocator());
        kernel.gemm(
            self.as_slice(),
            false,
            rhs.as_slice(),
            false,
            m,
            n,
            k1,
            out.data_mut(),
        );
        Ok(out)
    }
}

impl PartialEq for Tensor {
    /// Equal shapes and bitwise-equal values. NaN never compares equal.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}, alloc={:?})", self.shape, self.allocator())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 8;
        let vals = self.as_slice();
        write!(f, "Tensor{} [", self.shape)?;
        for (i, v) in vals.iter().take(SHOWN).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:.4}")?;
        }
        if vals.len() > SHOWN {
            write!(f, ", ... ({} more)", vals.len() - SHOWN)?;
        }
        write!(f, "]")
    }
}
