// Random tensor factories
//
//   uniform(shape, low, high, rng)   U(low, high)
//   normal(shape, mean, std, rng)    N(mean, std)
//   glorot_uniform(shape, rng)       U(-l, l), l = sqrt(6 / (fan_in + fan_out))
//   glorot_normal(shape, rng)        N(0, s),  s = sqrt(2 / (fan_in + fan_out))
//
// Every factory takes the random source explicitly. Pass a seeded
// `StdRng` for reproducible runs.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// (fan_in, fan_out) of a weight shape.
///
/// Weights multiply from the right (`x . W`), so a matrix is `[in, out]`.
/// Higher ranks treat all leading dims as a receptive field:
/// `[.., in, out]` has fan_in = in * field and fan_out = out * field.
fn fans(shape: &Shape) -> (f32, f32) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f32, dims[0] as f32),
        n => {
            let field: usize = dims[..n - 2].iter().product();
            (
                (dims[n - 2] * field) as f32,
                (dims[n - 1] * field) as f32,
            )
        }
    }
}

fn sample<D, R>(shape: Shape, dist: D, rng: &mut R) -> Result<Tensor>
where
    D: Distribution<f32>,
    R: Rng + ?Sized,
{
    let data: Vec<f32> = dist.sample_iter(rng).take(shape.elem_count()).collect();
    Tensor::from_vec(data, shape)
}

impl Tensor {
    /// Values drawn from `U(low, high)`.
    pub fn uniform<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Result<Tensor> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::msg(format!(
                "uniform: invalid range [{low}, {high})"
            )));
        }
        sample(shape.into(), Uniform::new(low, high), rng)
    }

    /// Values drawn from `N(mean, std)`.
    pub fn normal<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        mean: f32,
        std: f32,
        rng: &mut R,
    ) -> Result<Tensor> {
        let dist = Normal::new(mean, std)
            .map_err(|e| Error::msg(format!("normal(mean={mean}, std={std}): {e}")))?;
        sample(shape.into(), dist, rng)
    }

    pub fn glorot_uniform<R: Rng + ?Sized>(shape: impl Into<Shape>, rng: &mut R) -> Result<Tensor> {
        let shape = shape.into();
        let (fan_in, fan_out) = fans(&shape);
        let limit = (6.0 / (fan_in + fan_out)).sqrt();
        Tensor::uniform(shape, -limit, limit, rng)
    }

    pub fn glorot_normal<R: Rng + ?Sized>(shape: impl Into<Shape>, rng: &mut R) -> Result<Tensor> {
        let shape = shape.into();
        let (fan_in, fan_out) = fans(&shape);
        Tensor::normal(shape, 0.0, (2.0 / (fan_in + fan_out)).sqrt(), rng)
    }
}
