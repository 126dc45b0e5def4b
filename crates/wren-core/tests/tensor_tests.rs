// Integration tests for wren-core
//
// Tensor value semantics, broadcasting, persistence and the allocators,
// exercised through the public API only.

use rand::rngs::StdRng;
use rand::SeedableRng;

use wren_core::{
    load_tensor, save_tensor, Allocator, CachedAllocator, Error, ReduceOp, Result, Tensor,
};

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!(
            (g - e).abs() < tol,
            "index {i}: got {g} expected {e} (tol {tol})"
        );
    }
}

// Persistence

#[test]
fn test_save_load_square_tensors() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    for d in 1..8 {
        let t = Tensor::uniform((d, d), -10.0, 10.0, &mut rng)?;
        let path = std::env::temp_dir().join(format!("wren_test_tensor_{d}.txt"));
        save_tensor(&path, &t)?;
        let back = load_tensor(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(back.dims(), &[d, d]);
        assert!(t.max_abs_diff(&back)? < 1e-5);
    }
    Ok(())
}

#[test]
fn test_load_missing_file_is_io_error() {
    let path = std::env::temp_dir().join("wren_test_does_not_exist.txt");
    assert!(matches!(load_tensor(path), Err(Error::Io(_))));
}

// Copy semantics

#[test]
fn test_deep_copy_properties() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let x = Tensor::normal((3, 4), 0.0, 1.0, &mut rng)?;

    let once = x.deep_copy();
    let twice = once.deep_copy();
    assert_eq!(twice, once);
    assert!(!twice.shares_buffer(&once));

    let mut copy = x.deep_copy();
    copy.fill(0.0);
    assert_eq!(x, x.clone());
    assert!(x.as_slice().iter().any(|&v| v != 0.0));
    Ok(())
}

#[test]
fn test_clone_then_mutate_leaves_source() -> Result<()> {
    let src = Tensor::from_vec(vec![1.0, 2.0, 3.0], 3)?;
    let mut alias = src.clone();
    alias.add_assign(&Tensor::ones(3))?;
    assert_eq!(src.as_slice(), &[1.0, 2.0, 3.0]);
    assert_eq!(alias.as_slice(), &[2.0, 3.0, 4.0]);
    Ok(())
}

// Broadcasting

#[test]
fn test_broadcast_column_against_matrix() -> Result<()> {
    let (n, m) = (3, 4);
    let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], (n, 1))?;
    let b = Tensor::from_vec((0..n * m).map(|v| v as f32).collect(), (n, m))?;
    let c = a.mul(&b)?;
    for i in 0..n {
        for j in 0..m {
            let expected = a.as_slice()[i] * b.as_slice()[i * m + j];
            assert_eq!(c.as_slice()[i * m + j], expected);
        }
    }
    Ok(())
}

#[test]
fn test_broadcast_row_vector() -> Result<()> {
    let a = Tensor::from_vec(vec![1.0, 2.0], 2)?;
    let b = Tensor::zeros((3, 2));
    let c = b.sub(&a)?;
    assert_eq!(c.as_slice(), &[-1.0, -2.0, -1.0, -2.0, -1.0, -2.0]);
    let expanded = a.broadcast_to((3, 2))?;
    assert_eq!(expanded.dims(), &[3, 2]);
    assert!(a.broadcast_to(3).is_err());
    Ok(())
}

#[test]
fn test_incompatible_shapes() {
    let a = Tensor::zeros((2, 3));
    let b = Tensor::zeros((3, 2));
    assert!(matches!(
        a.add(&b),
        Err(Error::BroadcastIncompatible { .. })
    ));
    assert!(matches!(
        a.clone().add_assign(&b),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_large_elementwise_matches_small_path() -> Result<()> {
    // above the parallel threshold
    let n = 1 << 15;
    let a = Tensor::from_vec((0..n).map(|v| (v % 97) as f32).collect(), n)?;
    let b = a.map(|v| v * 2.0 + 1.0);
    assert_eq!(b.as_slice()[96], 193.0);
    assert_eq!(b.sum_all(), a.sum_all() * 2.0 + n as f32);
    Ok(())
}

// Reductions

#[test]
fn test_reduce_keep_dim_shapes() -> Result<()> {
    let t = Tensor::ones((2, 3, 4));
    assert_eq!(t.reduce(ReduceOp::Sum, Some(1), true)?.dims(), &[2, 1, 4]);
    assert_eq!(t.reduce(ReduceOp::Sum, Some(1), false)?.dims(), &[2, 4]);
    assert_vec_approx(
        t.reduce(ReduceOp::Mean, Some(2), false)?.as_slice(),
        &[1.0; 6],
        1e-6,
    );
    assert!(matches!(
        t.reduce(ReduceOp::Max, Some(3), false),
        Err(Error::DimOutOfRange { dim: 3, rank: 3 })
    ));
    Ok(())
}

// Allocators

#[test]
fn test_cached_allocator_recycles_tensors() -> Result<()> {
    let pool = CachedAllocator::new();
    let alloc = Allocator::Cached(pool.clone());
    for _ in 0..10 {
        let a = Tensor::full_in((8, 8), 2.0, &alloc);
        let b = a.scale(3.0);
        assert_eq!(b.as_slice()[0], 6.0);
    }
    let stats = pool.stats();
    assert!(stats.hits >= 18, "expected reuse, got {stats:?}");
    assert!(stats.misses <= 2);

    let freed = pool.gc();
    assert_eq!(freed, stats.cached_bytes);
    assert_eq!(pool.stats().cached_bytes, 0);
    Ok(())
}

#[test]
fn test_allocator_choice_does_not_change_results() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let x = Tensor::normal((5, 5), 0.0, 1.0, &mut rng)?;
    let reference = x.matmul(&x.transpose()?)?.softmax()?;
    for alloc in [Allocator::SmallBuffer, Allocator::cached()] {
        let moved = x.to_allocator(&alloc);
        let got = moved.matmul(&moved.transpose()?)?.softmax()?;
        assert_eq!(got.allocator(), alloc);
        assert_eq!(got, reference);
    }
    Ok(())
}
