//! Chunk plans for parallel reduction
//!
//! Splits the index range [0, n) of a sequence into contiguous chunks for use
//! with parallel execution. The split is driven by a [`SplitPolicy`]; whatever
//! the policy, the resulting [`ChunkPlan`] holds ordered, non-empty, disjoint
//! chunks whose union is exactly [0, n).

use std::ops::Range;

use thiserror::Error;

use crate::reduce::ReduceError;

/// Errors that can occur when configuring a split policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("block size must be greater than 0, got {0}")]
    InvalidBlockSize(usize),

    #[error("chunk count must be greater than 0, got {0}")]
    InvalidChunkCount(usize),

    #[error("minimum chunk length must be greater than 0, got {0}")]
    InvalidMinLen(usize),

    #[error("invalid chunks-per-worker bounds: min {min}, max {max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("chunks must tile [0, {n}) in order, expected a chunk starting at {next}")]
    InvalidCover { n: usize, next: usize },
}

/// A contiguous half-open range [start, end) of sequence indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// Returns the number of indices in this chunk
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if this chunk has no indices
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the chunk as a slice range
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Chunk> for Range<usize> {
    fn from(chunk: Chunk) -> Self {
        chunk.range()
    }
}

/// Ordered chunks covering [0, n)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Length of the sequence being split
    pub n: usize,

    /// Length of the longest chunk (0 for an empty plan)
    pub block_size: usize,

    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    fn new(n: usize, chunks: Vec<Chunk>) -> Self {
        let block_size = chunks.iter().map(Chunk::len).max().unwrap_or(0);
        Self {
            n,
            block_size,
            chunks,
        }
    }

    /// Build a plan from chunks produced elsewhere
    ///
    /// The chunks must be non-empty, in index order, and tile [0, n) with no
    /// gap or overlap. Use this from a custom [`SplitPolicy`].
    pub fn from_chunks(n: usize, chunks: Vec<Chunk>) -> Result<Self, SplitError> {
        match first_gap(n, &chunks) {
            Some(next) => Err(SplitError::InvalidCover { n, next }),
            None => Ok(Self::new(n, chunks)),
        }
    }

    /// Split [0, n) into consecutive chunks of `block_size`, the last one shorter
    fn from_block_size(n: usize, block_size: usize) -> Result<Self, ReduceError> {
        let mut chunks = Vec::new();
        chunks.try_reserve_exact(n.div_ceil(block_size))?;

        let mut start = 0;
        while start < n {
            let end = start.saturating_add(block_size).min(n);
            chunks.push(Chunk { start, end });
            start = end;
        }

        Ok(Self::new(n, chunks))
    }

    /// Split [0, n) into `min(count, n)` chunks whose lengths differ by at most one
    fn from_count(n: usize, count: usize) -> Result<Self, ReduceError> {
        let count = count.min(n);
        let mut chunks = Vec::new();
        chunks.try_reserve_exact(count)?;

        if count > 0 {
            let base = n / count;
            let extra = n % count;
            let mut start = 0;
            for i in 0..count {
                let end = start + base + usize::from(i < extra);
                chunks.push(Chunk { start, end });
                start = end;
            }
        }

        Ok(Self::new(n, chunks))
    }

    /// Returns the number of chunks
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the plan has no chunks (only for n == 0)
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the chunks in index order
    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Returns an iterator over the chunks
    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    /// Verify that all indices from 0 to n-1 are covered exactly once, in order
    #[cfg(test)]
    fn verify_coverage(&self) -> bool {
        first_gap(self.n, &self.chunks).is_none()
    }
}

/// First index at which `chunks` stop tiling [0, n), if any
fn first_gap(n: usize, chunks: &[Chunk]) -> Option<usize> {
    let mut next = 0;
    for chunk in chunks {
        if chunk.start != next || chunk.end <= chunk.start || chunk.end > n {
            return Some(next);
        }
        next = chunk.end;
    }
    (next != n).then_some(next)
}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Strategy for splitting [0, n) into chunks
///
/// Implementations decide chunk count and boundaries; the only contract is
/// that the returned plan covers [0, n) with ordered, disjoint, non-empty
/// chunks. `hint` is the number of workers available to the reduction.
/// Policies are shared with the worker pool, hence `Send + Sync`.
pub trait SplitPolicy: Send + Sync {
    /// Split [0, n) into a chunk plan for `hint` workers
    fn split(&self, n: usize, hint: usize) -> Result<ChunkPlan, ReduceError>;
}

impl<P: SplitPolicy + ?Sized> SplitPolicy for &P {
    fn split(&self, n: usize, hint: usize) -> Result<ChunkPlan, ReduceError> {
        (**self).split(n, hint)
    }
}

impl<P: SplitPolicy + ?Sized> SplitPolicy for Box<P> {
    fn split(&self, n: usize, hint: usize) -> Result<ChunkPlan, ReduceError> {
        (**self).split(n, hint)
    }
}

/// Consecutive chunks of a fixed number of elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBlock(usize);

impl FixedBlock {
    /// Create a policy with `block_size` elements per chunk (must be > 0)
    pub fn new(block_size: usize) -> Result<Self, SplitError> {
        if block_size == 0 {
            return Err(SplitError::InvalidBlockSize(0));
        }
        Ok(Self(block_size))
    }

    /// Returns the number of elements per chunk
    pub fn block_size(&self) -> usize {
        self.0
    }
}

impl SplitPolicy for FixedBlock {
    fn split(&self, n: usize, _hint: usize) -> Result<ChunkPlan, ReduceError> {
        ChunkPlan::from_block_size(n, self.0)
    }
}

/// A fixed number of near-equal chunks, independent of the worker count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCount(usize);

impl ChunkCount {
    /// Create a policy producing `count` chunks (must be > 0)
    pub fn new(count: usize) -> Result<Self, SplitError> {
        if count == 0 {
            return Err(SplitError::InvalidChunkCount(0));
        }
        Ok(Self(count))
    }

    /// Returns the requested number of chunks
    pub fn count(&self) -> usize {
        self.0
    }
}

impl SplitPolicy for ChunkCount {
    fn split(&self, n: usize, _hint: usize) -> Result<ChunkPlan, ReduceError> {
        ChunkPlan::from_count(n, self.0)
    }
}

/// Recursive halving down to a minimum granularity
///
/// A range is halved while it is longer than `min_len`, so every chunk ends
/// up with at most `min_len` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halving {
    min_len: usize,
}

impl Halving {
    /// Create a policy halving ranges down to `min_len` elements (must be > 0)
    pub fn new(min_len: usize) -> Result<Self, SplitError> {
        if min_len == 0 {
            return Err(SplitError::InvalidMinLen(0));
        }
        Ok(Self { min_len })
    }

    /// Returns the length below which ranges are no longer halved
    pub fn min_len(&self) -> usize {
        self.min_len
    }
}

fn halve(start: usize, end: usize, min_len: usize, out: &mut Vec<Chunk>) {
    if end - start <= min_len {
        out.push(Chunk { start, end });
        return;
    }
    let mid = start + (end - start) / 2;
    halve(start, mid, min_len, out);
    halve(mid, end, min_len, out);
}

impl SplitPolicy for Halving {
    fn split(&self, n: usize, _hint: usize) -> Result<ChunkPlan, ReduceError> {
        let mut chunks = Vec::new();
        if n > 0 {
            // Every leaf holds at least ceil(min_len / 2) elements.
            let bound = n.div_ceil(self.min_len).saturating_mul(2).min(n);
            chunks.try_reserve_exact(bound)?;
            halve(0, n, self.min_len, &mut chunks);
        }
        Ok(ChunkPlan::new(n, chunks))
    }
}

/// Configuration for autotuning chunk size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutotuneConfig {
    /// Target minimum chunks per worker (for load balancing)
    /// Default: 4 (allows stealing/balancing)
    pub min_chunks_per_worker: usize,

    /// Target maximum chunks per worker (to limit dispatch overhead)
    /// Default: 64
    pub max_chunks_per_worker: usize,

    /// Preferred chunk length, overridden by the per-worker bounds
    /// Default: 1024
    pub min_chunk_len: usize,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            min_chunks_per_worker: 4,
            max_chunks_per_worker: 64,
            min_chunk_len: 1024,
        }
    }
}

impl AutotuneConfig {
    /// Set the minimum chunk length
    pub fn with_min_chunk_len(self, min_chunk_len: usize) -> Self {
        Self {
            min_chunk_len,
            ..self
        }
    }

    /// Set the chunks-per-worker bounds
    pub fn with_chunks_per_worker(self, min: usize, max: usize) -> Self {
        Self {
            min_chunks_per_worker: min,
            max_chunks_per_worker: max,
            ..self
        }
    }

    /// Check that the bounds describe a non-empty target range
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.min_chunks_per_worker == 0 || self.min_chunks_per_worker > self.max_chunks_per_worker
        {
            return Err(SplitError::InvalidBounds {
                min: self.min_chunks_per_worker,
                max: self.max_chunks_per_worker,
            });
        }
        if self.min_chunk_len == 0 {
            return Err(SplitError::InvalidMinLen(0));
        }
        Ok(())
    }
}

/// Chunk size derived from the worker count and a preferred granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Autotune {
    config: AutotuneConfig,
}

impl Autotune {
    /// Create an autotuning policy, rejecting invalid bounds
    pub fn new(config: AutotuneConfig) -> Result<Self, SplitError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the autotuning configuration
    pub fn config(&self) -> &AutotuneConfig {
        &self.config
    }
}

impl SplitPolicy for Autotune {
    fn split(&self, n: usize, hint: usize) -> Result<ChunkPlan, ReduceError> {
        ChunkPlan::from_block_size(n, autotune_block_size(n, hint, &self.config))
    }
}

/// Compute a block size using autotuning heuristics
///
/// The autotuning considers:
/// 1. Granularity: aim for chunks of min_chunk_len elements
/// 2. Load balancing: at least min_chunks_per_worker chunks per worker
/// 3. Dispatch overhead: at most max_chunks_per_worker chunks per worker
/// 4. Never more chunks than elements
fn autotune_block_size(n: usize, workers: usize, config: &AutotuneConfig) -> usize {
    let workers = workers.max(1);
    let min_chunks = workers.saturating_mul(config.min_chunks_per_worker).max(1);
    let max_chunks = workers
        .saturating_mul(config.max_chunks_per_worker)
        .max(min_chunks);

    let target_chunks = (n / config.min_chunk_len.max(1))
        .clamp(min_chunks, max_chunks)
        .min(n)
        .max(1);

    n.div_ceil(target_chunks).max(1)
}
