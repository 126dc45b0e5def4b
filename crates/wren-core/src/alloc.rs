// Allocators: where tensor buffers come from and where they go
//
// Every tensor buffer is created through an `Allocator`. Three strategies:
//
//   Heap         plain Vec<f32>, freed on drop
//   SmallBuffer  inline storage for buffers of at most INLINE_CAPACITY values,
//                spilling to the heap above that
//   Cached       a shared pool of free buffers keyed by byte size; dropping
//                a tensor hands its buffer back to the pool instead of freeing
//
// The cached pool is a context object. Construct one per training run (or
// share one between models) and call `gc()` to give the memory back.
//
// The strategy never changes results. Buffers handed out are always zeroed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use smallvec::SmallVec;

/// Largest buffer (in values) the small-buffer strategy keeps inline.
pub const INLINE_CAPACITY: usize = 16;

const VALUE_BYTES: usize = std::mem::size_of::<f32>();

/// Allocation strategy for tensor buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Allocator {
    #[default]
    Heap,
    SmallBuffer,
    Cached(CachedAllocator),
}

impl Allocator {
    /// A fresh cached allocator with its own empty pool.
    pub fn cached() -> Self {
        Allocator::Cached(CachedAllocator::new())
    }

    /// A zero-filled buffer of `len` values.
    pub(crate) fn zeroed(&self, len: usize) -> Buffer {
        match self {
            Allocator::Heap => Buffer::Heap(vec![0.0; len]),
            Allocator::SmallBuffer => Buffer::Inline(SmallVec::from_elem(0.0, len)),
            Allocator::Cached(pool) => Buffer::Pooled {
                data: pool.take(len),
                pool: pool.clone(),
            },
        }
    }

    /// Wrap an existing vector without copying where the strategy allows it.
    pub(crate) fn adopt(&self, data: Vec<f32>) -> Buffer {
        match self {
            Allocator::Heap => Buffer::Heap(data),
            Allocator::SmallBuffer => Buffer::Inline(SmallVec::from_vec(data)),
            Allocator::Cached(pool) => Buffer::Pooled {
                data,
                pool: pool.clone(),
            },
        }
    }

    pub(crate) fn copy_of(&self, src: &[f32]) -> Buffer {
        let mut buf = self.zeroed(src.len());
        buf.as_mut_slice().copy_from_slice(src);
        buf
    }
}

// Cached pool

/// Snapshot of a cached allocator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently parked in the pool (not owned by any tensor).
    pub cached_bytes: usize,
    /// Number of parked buffers.
    pub cached_buffers: usize,
    /// Allocations served from the pool.
    pub hits: u64,
    /// Allocations that fell through to the global allocator.
    pub misses: u64,
}

#[derive(Default)]
struct Pool {
    // byte size -> stack of free buffers of exactly that size
    buckets: Mutex<HashMap<usize, Vec<Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Handle to a pool of reusable buffers.
///
/// Clones share the pool. Two handles compare equal iff they share it, so
/// tensors allocated through either are interchangeable.
#[derive(Clone, Default)]
pub struct CachedAllocator {
    pool: Arc<Pool>,
}

impl CachedAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Vec<Vec<f32>>>> {
        self.pool
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop a pooled buffer of `len` values, or allocate a new one. Always zeroed.
    fn take(&self, len: usize) -> Vec<f32> {
        let reused = self
            .buckets()
            .get_mut(&(len * VALUE_BYTES))
            .and_then(Vec::pop);
        match reused {
            Some(mut buf) => {
                self.pool.hits.fetch_add(1, Ordering::Relaxed);
                buf.fill(0.0);
                buf
            }
            None => {
                self.pool.misses.fetch_add(1, Ordering::Relaxed);
                vec![0.0; len]
            }
        }
    }

    /// Park a buffer for reuse.
    fn give_back(&self, buf: Vec<f32>) {
        if buf.is_empty() {
            return;
        }
        self.buckets()
            .entry(buf.len() * VALUE_BYTES)
            .or_default()
            .push(buf);
    }

    /// Release every parked buffer. Returns the number of bytes freed.
    pub fn gc(&self) -> usize {
        self.buckets()
            .drain()
            .map(|(bytes, stack)| bytes * stack.len())
            .sum()
    }

    pub fn stats(&self) -> PoolStats {
        let buckets = self.buckets();
        let cached_buffers = buckets.values().map(Vec::len).sum();
        let cached_bytes = buckets
            .iter()
            .map(|(bytes, stack)| bytes * stack.len())
            .sum();
        PoolStats {
            cached_bytes,
            cached_buffers,
            hits: self.pool.hits.load(Ordering::Relaxed),
            misses: self.pool.misses.load(Ordering::Relaxed),
        }
    }
}

impl PartialEq for CachedAllocator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }
}

impl fmt::Debug for CachedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats();
        f.debug_struct("CachedAllocator")
            .field("cached_bytes", &s.cached_bytes)
            .field("hits", &s.hits)
            .field("misses", &s.misses)
            .finish()
    }
}

// Buffer

/// Contiguous storage behind a tensor.
pub(crate) enum Buffer {
    Heap(Vec<f32>),
    Inline(SmallVec<[f32; INLINE_CAPACITY]>),
    Pooled { data: Vec<f32>, pool: CachedAllocator },
}

impl Buffer {
    pub(crate) fn as_slice(&self) -> &[f32] {
        match self {
            Buffer::Heap(v) => v,
            Buffer::Inline(v) => v,
            Buffer::Pooled { data, .. } => data,
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        match self {
            Buffer::Heap(v) => v,
            Buffer::Inline(v) => v,
            Buffer::Pooled { data, .. } => data,
        }
    }

    pub(crate) fn allocator(&self) -> Allocator {
        match self {
            Buffer::Heap(_) => Allocator::Heap,
            Buffer::Inline(_) => Allocator::SmallBuffer,
            Buffer::Pooled { pool, .. } => Allocator::Cached(pool.clone()),
        }
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.allocator().copy_of(self.as_slice())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Buffer::Pooled { data, pool } = self {
            pool.give_back(std::mem::take(data));
        }
    }
}
