// Operator tags and their forward/backward rules
//
// Every operator node carries one of these tags. The session dispatches on
// the tag for both directions:
//
//   unary:   forward(x) -> y               backward(x, y, dy) -> dx
//   binary:  forward(a, b) -> y            backward(a, b, dy) -> (da, db)
//
// Backward rules always return gradients shaped like the corresponding
// input. Broadcasting binary ops fold the output-shaped gradient back onto
// each input with `sum_to_shape`.
//
// GRADIENT RULES:
//
//   Add:      da = dy,          db = dy
//   Sub:      da = dy,          db = -dy
//   Mul:      da = dy * b,      db = dy * a
//   Div:      da = dy / b,      db = -dy * a / b^2
//   MatMul:   dA = dY . B^T,    dB = A^T . dY
//   Exp:      dx = dy * y
//   Log:      dx = dy / x
//   Sigmoid:  dx = dy * y * (1 - y)
//   Tanh:     dx = dy * (1 - y^2)
//   Softmax:  dx = dy * y * (1 - y)        diagonal of the Jacobian only
//   Sum:      dx = broadcast(dy)
//   Mean:     dx = broadcast(dy) / count
//   Max/Min:  dx = dy routed to the first extremal element, zero elsewhere
//
// The softmax rule ignores the off-diagonal Jacobian terms. It is exact only
// when the cross term is supplied downstream, as `SoftmaxCrossEntropy`
// does by differentiating the fused expression directly. Standalone softmax
// gradients are an approximation.

use wren_core::{Error, Gemm, ReduceOp, Result, Shape, Tensor, EPSILON};

/// Single-input operators.
#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Square,
    Abs,
    Sigmoid,
    Tanh,
    Relu,
    /// `x` for positive inputs, `factor * x` otherwise.
    LeakyRelu(f32),
    /// Over the last axis.
    Softmax,
    /// Sum/mean/max/min over one axis, or every value when `axis` is `None`.
    Reduce {
        op: ReduceOp,
        axis: Option<usize>,
        keep_dim: bool,
    },
    /// With `include_batch` the input's leading dim is prepended to `dims`.
    Reshape {
        dims: Vec<usize>,
        include_batch: bool,
    },
    /// `[batch, ...] -> [batch, rest]`.
    Flatten,
    /// Rank-2 transpose.
    Transpose,
    Clip {
        min: f32,
        max: f32,
    },
    Identity,
}

/// Two-input operators.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    /// Elementwise product.
    Mul,
    Div,
    /// Rank-2 matrix product through the session's kernel.
    MatMul,
    /// `(target, logits)`: softmax of the logits scored against the target.
    /// Produces a `[1]` loss averaged over the batch.
    SoftmaxCrossEntropy { label_smoothing: f32 },
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Fold an output-shaped gradient onto `target` by summing every axis the
/// forward pass broadcast: implicit leading axes and axes where `target`
/// has size 1.
pub fn sum_to_shape(grad: &Tensor, target: &Shape) -> Result<Tensor> {
    if grad.shape() == target {
        return Ok(grad.clone());
    }
    if target.elem_count() == 1 {
        return Ok(Tensor::full_in(target.clone(), grad.sum_all(), &grad.allocator()));
    }
    let mut out = grad.clone();
    while out.rank() > target.rank() {
        out = out.reduce(ReduceOp::Sum, Some(0), false)?;
    }
    for (axis, &d) in target.dims().iter().enumerate() {
        if d == 1 && out.dims()[axis] != 1 {
            out = out.reduce(ReduceOp::Sum, Some(axis), true)?;
        }
    }
    Ok(out)
}

/// Stretch a reduced gradient back over the reduced input shape.
fn expand_reduced(grad: &Tensor, input: &Shape, axis: Option<usize>) -> Result<Tensor> {
    let kept = match axis {
        Some(a) => input.reduced(a, true)?,
        None => Shape::new(vec![1; input.rank()]),
    };
    grad.reshape(kept)?.broadcast_to(input.clone())
}

/// Gradient of max/min: each reduced value's gradient goes to the first
/// input element that attained it.
fn route_to_extremum(x: &Tensor, y: &Tensor, grad: &Tensor, axis: Option<usize>) -> Result<Tensor> {
    let (outer, len, inner) = match axis {
        Some(a) => x.shape().split_at_axis(a)?,
        None => (1, x.elem_count(), 1),
    };
    let (xs, ys, gs) = (x.as_slice(), y.as_slice(), grad.as_slice());
    let mut dx = x.zeros_like();
    let out = dx.data_mut();
    for o in 0..outer {
        for i in 0..inner {
            let j = o * inner + i;
            let hit = (0..len)
                .map(|k| (o * len + k) * inner + i)
                .find(|&p| xs[p] == ys[j]);
            if let Some(p) = hit {
                out[p] = gs[j];
            }
        }
    }
    Ok(dx)
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Square => "square",
            UnaryOp::Abs => "abs",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Relu => "relu",
            UnaryOp::LeakyRelu(_) => "leaky_relu",
            UnaryOp::Softmax => "softmax",
            UnaryOp::Reduce { op, .. } => op.name(),
            UnaryOp::Reshape { .. } => "reshape",
            UnaryOp::Flatten => "flatten",
            UnaryOp::Transpose => "transpose",
            UnaryOp::Clip { .. } => "clip",
            UnaryOp::Identity => "identity",
        }
    }

    fn reshape_target(&self, x: &Tensor) -> Result<Shape> {
        match self {
            UnaryOp::Reshape {
                dims,
                include_batch: false,
            } => Ok(Shape::new(dims.clone())),
            UnaryOp::Reshape {
                dims,
                include_batch: true,
            } => {
                let mut full = vec![x.shape().dim(0)?];
                full.extend_from_slice(dims);
                Ok(Shape::new(full))
            }
            _ => {
                let batch = x.shape().dim(0)?;
                Ok(Shape::from((batch, x.elem_count() / batch.max(1))))
            }
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(match self {
            UnaryOp::Neg => x.neg(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Square => x.square(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sigmoid => x.map(sigmoid),
            UnaryOp::Tanh => x.map(f32::tanh),
            UnaryOp::Relu => x.map(|v| v.max(0.0)),
            UnaryOp::LeakyRelu(f) => {
                let f = *f;
                x.map(move |v| if v > 0.0 { v } else { f * v })
            }
            UnaryOp::Softmax => x.softmax()?,
            UnaryOp::Reduce { op, axis, keep_dim } => x.reduce(*op, *axis, *keep_dim)?,
            UnaryOp::Reshape { .. } | UnaryOp::Flatten => x.reshape(self.reshape_target(x)?)?,
            UnaryOp::Transpose => x.transpose()?,
            UnaryOp::Clip { min, max } => {
                let (lo, hi) = (*min, *max);
                x.map(move |v| v.max(lo).min(hi))
            }
            UnaryOp::Identity => x.clone(),
        })
    }

    /// Gradient with respect to `x`, given the forward output `y` and the
    /// upstream gradient `dy`.
    pub fn backward(&self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Tensor> {
        match self {
            UnaryOp::Neg => Ok(dy.neg()),
            UnaryOp::Exp => dy.mul(y),
            UnaryOp::Log => dy.div(x),
            UnaryOp::Sqrt => dy.zip_broadcast(y, |g, o| g / (2.0 * o)),
            UnaryOp::Square => dy.zip_broadcast(x, |g, v| 2.0 * v * g),
            UnaryOp::Abs => dy.zip_broadcast(x, |g, v| if v > 0.0 { g } else { -g }),
            UnaryOp::Sigmoid | UnaryOp::Softmax => dy.zip_broadcast(y, |g, o| g * o * (1.0 - o)),
            UnaryOp::Tanh => dy.zip_broadcast(y, |g, o| g * (1.0 - o * o)),
            UnaryOp::Relu => dy.zip_broadcast(x, |g, v| if v > 0.0 { g } else { 0.0 }),
            UnaryOp::LeakyRelu(f) => {
                let f = *f;
                dy.zip_broadcast(x, move |g, v| if v > 0.0 { g } else { f * g })
            }
            UnaryOp::Reduce { op, axis, .. } => match op {
                ReduceOp::Sum => expand_reduced(dy, x.shape(), *axis),
                ReduceOp::Mean => {
                    let count = match axis {
                        Some(a) => x.shape().dim(*a)?,
                        None => x.elem_count(),
                    };
                    Ok(expand_reduced(dy, x.shape(), *axis)?.scale(1.0 / count as f32))
                }
                ReduceOp::Max | ReduceOp::Min => route_to_extremum(x, y, dy, *axis),
            },
            UnaryOp::Reshape { .. } | UnaryOp::Flatten => dy.reshape(x.shape().clone()),
            UnaryOp::Transpose => dy.transpose(),
            UnaryOp::Clip { min, max } => {
                let (lo, hi) = (*min, *max);
                dy.zip_broadcast(x, move |g, v| if v >= lo && v <= hi { g } else { 0.0 })
            }
            UnaryOp::Identity => Ok(dy.clone()),
        }
    }
}

/// Smoothed one-hot target: `t * (1 - s) + s / classes`.
fn smooth_target(target: &Tensor, smoothing: f32) -> Tensor {
    if smoothing == 0.0 {
        return target.clone();
    }
    let classes = target.dims().last().copied().unwrap_or(1) as f32;
    target.map(move |t| t * (1.0 - smoothing) + smoothing / classes)
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::MatMul => "matmul",
            BinaryOp::SoftmaxCrossEntropy { .. } => "softmax_cross_entropy",
        }
    }

    pub fn forward(&self, a: &Tensor, b: &Tensor, kernel: &dyn Gemm) -> Result<Tensor> {
        match self {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
            BinaryOp::MatMul => a.matmul_with(b, kernel),
            BinaryOp::SoftmaxCrossEntropy { label_smoothing } => {
                a.ensure_same_shape(b)?;
                let probs = b.softmax()?;
                let target = smooth_target(a, *label_smoothing);
                let total: f32 = target
                    .as_slice()
                    .iter()
                    .zip(probs.as_slice())
                    .map(|(t, p)| -t * p.max(EPSILON).ln())
                    .sum();
                let batch = a.shape().batch_size() as f32;
                Ok(Tensor::full_in(1, total / batch, &b.allocator()))
            }
        }
    }

    /// Gradients with respect to `(a, b)`.
    pub fn backward(
        &self,
        a: &Tensor,
        b: &Tensor,
        dy: &Tensor,
        kernel: &dyn Gemm,
    ) -> Result<(Tensor, Tensor)> {
        let (sa, sb) = (a.shape(), b.shape());
        match self {
            BinaryOp::Add => Ok((sum_to_shape(dy, sa)?, sum_to_shape(dy, sb)?)),
            BinaryOp::Sub => Ok((sum_to_shape(dy, sa)?, sum_to_shape(&dy.neg(), sb)?)),
            BinaryOp::Mul => Ok((
                sum_to_shape(&dy.mul(b)?, sa)?,
                sum_to_shape(&dy.mul(a)?, sb)?,
            )),
            BinaryOp::Div => {
                let da = dy.div(b)?;
                let db = dy.mul(a)?.div(&b.square())?.neg();
                Ok((sum_to_shape(&da, sa)?, sum_to_shape(&db, sb)?))
            }
            BinaryOp::MatMul => {
                let (m, k, n) = match (a.dims(), b.dims()) {
                    ([m, k], [_, n]) => (*m, *k, *n),
                    _ => {
                        return Err(Error::RankMismatch {
                            expected: 2,
                            got: a.rank().max(b.rank()),
                        })
                    }
                };
                // dA (m x k) = dY (m x n) . B^T
                let mut da = Tensor::zeros_in((m, k), &a.allocator());
                kernel.gemm(dy.as_slice(), false, b.as_slice(), true, m, k, n, da.data_mut());
                // dB (k x n) = A^T . dY (m x n)
                let mut db = Tensor::zeros_in((k, n), &b.allocator());
                kernel.gemm(a.as_slice(), true, dy.as_slice(), false, k, n, m, db.data_mut());
                Ok((da, db))
            }
            BinaryOp::SoftmaxCrossEntropy { label_smoothing } => {
                let upstream = dy.as_scalar()?;
                let target = smooth_target(a, *label_smoothing);
                let dlogits = b.softmax()?.sub(&target)?.scale(upstream);
                Ok((a.zeros_like(), dlogits))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::CpuGemm;

    #[test]
    fn test_sum_to_shape_column() {
        let g = Tensor::ones((3, 4));
        let r = sum_to_shape(&g, &Shape::from((3, 1))).unwrap();
        assert_eq!(r.dims(), &[3, 1]);
        assert_eq!(r.as_slice(), &[4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_sum_to_shape_leading_and_scalar() {
        let g = Tensor::ones((2, 3, 4));
        let r = sum_to_shape(&g, &Shape::from(4)).unwrap();
        assert_eq!(r.as_slice(), &[6.0; 4]);
        let s = sum_to_shape(&g, &Shape::from(())).unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.as_slice(), &[24.0]);
    }

    #[test]
    fn test_max_routes_to_first() {
        let x = Tensor::from_vec(vec![3.0, 3.0, 1.0, 0.0, 5.0, 2.0], (2, 3)).unwrap();
        let op = UnaryOp::Reduce {
            op: ReduceOp::Max,
            axis: Some(1),
            keep_dim: false,
        };
        let y = op.forward(&x).unwrap();
        let dx = op.backward(&x, &y, &Tensor::ones(2)).unwrap();
        assert_eq!(dx.as_slice(), &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_mean_backward_divides_by_count() {
        let x = Tensor::ones((2, 2));
        let op = UnaryOp::Reduce {
            op: ReduceOp::Mean,
            axis: None,
            keep_dim: false,
        };
        let y = op.forward(&x).unwrap();
        let dx = op.backward(&x, &y, &Tensor::scalar(1.0)).unwrap();
        assert_eq!(dx.as_slice(), &[0.25; 4]);
    }

    #[test]
    fn test_flatten_keeps_batch() {
        let x = Tensor::zeros((2, 3, 4));
        let y = UnaryOp::Flatten.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 12]);
        let r = UnaryOp::Reshape {
            dims: vec![4, 3],
            include_batch: true,
        }
        .forward(&x)
        .unwrap();
        assert_eq!(r.dims(), &[2, 4, 3]);
    }

    #[test]
    fn test_cross_entropy_gradient_is_softmax_minus_target() {
        let target = Tensor::from_vec(vec![0.0, 1.0, 0.0], (1, 3)).unwrap();
        let logits = Tensor::from_vec(vec![1.0, 2.0, 3.0], (1, 3)).unwrap();
        let op = BinaryOp::SoftmaxCrossEntropy {
            label_smoothing: 0.0,
        };
        let (dt, dl) = op
            .backward(&target, &logits, &Tensor::scalar(2.0), &CpuGemm)
            .unwrap();
        let p = logits.softmax().unwrap();
        assert_eq!(dt.as_slice(), &[0.0; 3]);
        for i in 0..3 {
            let expected = 2.0 * (p.as_slice()[i] - target.as_slice()[i]);
            assert!((dl.as_slice()[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_label_smoothing() {
        let t = Tensor::from_vec(vec![0.0, 1.0], (1, 2)).unwrap();
        let s = smooth_target(&t, 0.2);
        assert!((s.as_slice()[0] - 0.1).abs() < 1e-6);
        assert!((s.as_slice()[1] - 0.9).abs() < 1e-6);
    }
}
