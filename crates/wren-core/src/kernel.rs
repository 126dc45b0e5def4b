// Gemm: the numeric kernel contract
//
// Every matrix product in wren (forward matmul and both matmul gradients)
// goes through this one call:
//
//   C (m x n) = op(A) (m x k) . op(B) (k x n)
//
// op(X) is X or its transpose. Each operand is passed in its own row-major
// storage order, so a transposed A is stored as (k x m) and a transposed B
// as (n x k). C is overwritten.
//
// `CpuGemm` is the built-in implementation. Accelerated backends implement
// the trait and are plugged in through the session configuration.

use std::fmt;

use rayon::prelude::*;

/// General matrix multiply.
pub trait Gemm: Send + Sync + fmt::Debug {
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        &self,
        a: &[f32],
        transpose_a: bool,
        b: &[f32],
        transpose_b: bool,
        m: usize,
        n: usize,
        k: usize,
        c: &mut [f32],
    );
}

/// Row-parallel CPU gemm.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuGemm;

/// Output size (m * n) from which rows are computed on the rayon pool.
const PARALLEL_GEMM_ELEMS: usize = 4096;

impl Gemm for CpuGemm {
    fn gemm(
        &self,
        a: &[f32],
        transpose_a: bool,
        b: &[f32],
        transpose_b: bool,
        m: usize,
        n: usize,
        k: usize,
        c: &mut [f32],
    ) {
        debug_assert_eq!(a.len(), m * k);
        debug_assert_eq!(b.len(), k * n);
        debug_assert_eq!(c.len(), m * n);

        let a_at = |i: usize, p: usize| if transpose_a { a[p * m + i] } else { a[i * k + p] };
        let b_at = |p: usize, j: usize| if transpose_b { b[j * k + p] } else { b[p * n + j] };

        let row = |i: usize, out: &mut [f32]| {
            out.fill(0.0);
            for p in 0..k {
                let aip = a_at(i, p);
                for (j, o) in out.iter_mut().enumerate() {
                    *o += aip * b_at(p, j);
                }
            }
        };

        if n == 0 {
            return;
        }
        if m * n >= PARALLEL_GEMM_ELEMS {
            c.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, out)| row(i, out));
        } else {
            c.chunks_mut(n).enumerate().for_each(|(i, out)| row(i, out));
        }
    }
}
