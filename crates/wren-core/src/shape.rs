use std::fmt;

use crate::{Error, Result};

// Shape: the dimension sizes of a dense tensor
//
// Tensors are always contiguous and row-major, so a shape alone fixes the
// memory layout. The helpers here cover the three layout questions the rest
// of the crate asks:
//   1. how many values a buffer holds (product of dims)
//   2. how two shapes broadcast against each other (trailing alignment)
//   3. how an axis splits a buffer into outer/axis/inner runs (reductions)

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of values. The rank-0 shape `[]` holds one value.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of dimension `d`.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Leading dimension, or 1 for rank-0 and rank-1 shapes.
    ///
    /// Losses and optimizers use this as the number of samples in a batch.
    pub fn batch_size(&self) -> usize {
        if self.rank() < 2 {
            1
        } else {
            self.0[0]
        }
    }

    /// Row-major strides: `[2, 3, 4]` has strides `[12, 4, 1]`.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.rank()];
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// Split the buffer around `axis` into `(outer, axis_len, inner)` runs.
    ///
    /// Element `(o, a, i)` lives at offset `(o * axis_len + a) * inner + i`.
    pub fn split_at_axis(&self, axis: usize) -> Result<(usize, usize, usize)> {
        let len = self.dim(axis)?;
        let outer = self.0[..axis].iter().product();
        let inner = self.0[axis + 1..].iter().product();
        Ok((outer, len, inner))
    }

    /// Shape after reducing `axis`. With `keep_dim` the axis stays as size 1.
    pub fn reduced(&self, axis: usize, keep_dim: bool) -> Result<Shape> {
        self.dim(axis)?;
        let mut dims = self.0.clone();
        if keep_dim {
            dims[axis] = 1;
        } else {
            dims.remove(axis);
        }
        Ok(Shape(dims))
    }

    // Broadcasting

    /// Broadcast output shape of two operands.
    ///
    /// Shapes are aligned from the right. Missing leading dims count as 1 and
    /// a dim of size 1 stretches to match the other side:
    ///   [3, 4] and [4]       -> [3, 4]
    ///   [2, 1] and [1, 3]    -> [2, 3]
    ///   [3] and [4]          -> error
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let (l, r) = (lhs.dims(), rhs.dims());
        let rank = l.len().max(r.len());
        let mut out = vec![0usize; rank];
        for i in 0..rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };
            out[rank - 1 - i] = match (ld, rd) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => {
                    return Err(Error::BroadcastIncompatible {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    })
                }
            };
        }
        Ok(Shape(out))
    }

    /// Strides that read this shape as if it had the (larger) `target` shape.
    ///
    /// Stretched and implicit leading dims get stride 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let own = self.strides();
        let offset = target.rank() - self.rank();
        let mut out = vec![0usize; target.rank()];
        for (i, &d) in self.0.iter().enumerate() {
            if d == target.0[i + offset] {
                out[i + offset] = own[i];
            }
        }
        out
    }
}

/// Maps a linear index of a broadcast output back to its two source offsets.
#[derive(Debug, Clone)]
pub struct BroadcastIndex {
    out_dims: Vec<usize>,
    lhs_strides: Vec<usize>,
    rhs_strides: Vec<usize>,
}

impl BroadcastIndex {
    pub fn new(lhs: &Shape, rhs: &Shape, out: &Shape) -> Self {
        Self {
            out_dims: out.dims().to_vec(),
            lhs_strides: lhs.broadcast_strides(out),
            rhs_strides: rhs.broadcast_strides(out),
        }
    }

    /// Source offsets `(lhs, rhs)` feeding output element `index`.
    #[inline]
    pub fn offsets(&self, mut index: usize) -> (usize, usize) {
        let (mut l, mut r) = (0, 0);
        for d in (0..self.out_dims.len()).rev() {
            let size = self.out_dims[d];
            let coord = index % size;
            index /= size;
            l += coord * self.lhs_strides[d];
            r += coord * self.rhs_strides[d];
        }
        (l, r)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(a: [usize; N]) -> Self {
        Shape(a.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}
