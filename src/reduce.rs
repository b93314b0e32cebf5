//! Parallel integer summation over chunk plans
//!
//! [`ParallelReducer`] splits a read-only `&[i32]` into contiguous chunks with
//! a [`SplitPolicy`], sums every chunk into a local `i64` on a rayon worker,
//! and folds each partial sum into one shared accumulator. The result never
//! depends on how many chunks were made or in which order they finished.
//!
//! Two combine strategies are available:
//!
//! - [`Combine::Atomic`] - each chunk issues a single relaxed `fetch_add` on a
//!   shared `AtomicI64`. Chunks share no other mutable state, so atomicity of
//!   the add is all the ordering the reduction needs.
//! - [`Combine::FanIn`] - each chunk returns its partial sum and the caller's
//!   thread adds them up after the parallel loop.
//!
//! # Example
//!
//! ```
//! use shardsum::{sum_sequential, ChunkCount, ParallelReducer};
//!
//! let data = vec![1, -1, 2, -2, 3];
//! let reducer = ParallelReducer::new(ChunkCount::new(2).unwrap());
//!
//! assert_eq!(reducer.reduce_sum(&data).unwrap(), 3);
//! assert_eq!(sum_sequential(&data), 3);
//! ```

use std::collections::TryReserveError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, trace_span};

use crate::chunks::{Autotune, ChunkPlan, SplitPolicy};

/// Errors that can occur during a reduction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    /// Memory or worker threads could not be obtained; no partial result exists
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl From<TryReserveError> for ReduceError {
    fn from(err: TryReserveError) -> Self {
        ReduceError::ResourceExhausted(format!("chunk allocation failed: {err}"))
    }
}

impl From<ThreadPoolBuildError> for ReduceError {
    fn from(err: ThreadPoolBuildError) -> Self {
        ReduceError::ResourceExhausted(format!("worker pool creation failed: {err}"))
    }
}

/// How partial sums are combined into the total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    /// One relaxed atomic add per chunk into a shared accumulator
    #[default]
    Atomic,

    /// Partial sums collected and added on the calling thread
    FanIn,
}

/// Splits, sums and combines integer sequences in parallel
///
/// Runs on rayon's global pool unless a dedicated pool is attached with
/// [`with_threads`](Self::with_threads) or [`with_pool`](Self::with_pool).
/// A reducer holds no per-call state and can be shared between threads.
#[derive(Debug, Clone)]
pub struct ParallelReducer<P = Autotune> {
    policy: P,
    pool: Option<Arc<ThreadPool>>,
    combine: Combine,
}

impl Default for ParallelReducer<Autotune> {
    fn default() -> Self {
        Self::new(Autotune::default())
    }
}

impl<P: SplitPolicy> ParallelReducer<P> {
    /// Create a reducer on the global pool with the given split policy
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            pool: None,
            combine: Combine::default(),
        }
    }

    /// Run on a dedicated pool of `threads` workers (0 lets rayon choose)
    ///
    /// Fails with [`ReduceError::ResourceExhausted`] if the workers cannot be
    /// spawned.
    pub fn with_threads(self, threads: usize) -> Result<Self, ReduceError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shardsum-{i}"))
            .build()?;
        Ok(self.with_pool(Arc::new(pool)))
    }

    /// Run on an existing pool
    pub fn with_pool(self, pool: Arc<ThreadPool>) -> Self {
        Self {
            pool: Some(pool),
            ..self
        }
    }

    /// Select how partial sums are combined
    pub fn with_combine(self, combine: Combine) -> Self {
        Self { combine, ..self }
    }

    /// Returns the split policy
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns the combine strategy
    pub fn combine(&self) -> Combine {
        self.combine
    }

    /// Number of workers the reduction fans out to
    pub fn workers(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Sum `sequence` in parallel
    ///
    /// Blocks until every chunk has been summed and combined. Returns 0 for an
    /// empty sequence. Elements are widened to `i64` before any addition.
    ///
    /// # Panics
    ///
    /// Panics if the policy returns a plan for a length other than
    /// `sequence.len()`.
    pub fn reduce_sum(&self, sequence: &[i32]) -> Result<i64, ReduceError> {
        let workers = self.workers();
        let plan = self.policy.split(sequence.len(), workers)?;
        assert_eq!(
            plan.n,
            sequence.len(),
            "split policy returned a plan for the wrong sequence length"
        );

        debug!(
            len = sequence.len(),
            chunks = plan.num_chunks(),
            block_size = plan.block_size,
            workers,
            combine = ?self.combine,
            "reducing sequence"
        );

        let combine = self.combine;
        match &self.pool {
            Some(pool) => pool.install(|| combine_chunks(sequence, &plan, combine)),
            None => combine_chunks(sequence, &plan, combine),
        }
    }
}

fn combine_chunks(
    sequence: &[i32],
    plan: &ChunkPlan,
    combine: Combine,
) -> Result<i64, ReduceError> {
    match combine {
        Combine::Atomic => {
            let total = AtomicI64::new(0);
            plan.as_slice().par_iter().for_each(|chunk| {
                let _span = trace_span!("chunk", start = chunk.start, end = chunk.end).entered();
                let partial = partial_sum(&sequence[chunk.range()]);
                total.fetch_add(partial, Ordering::Relaxed);
            });
            // par_iter joins every task before returning
            Ok(total.load(Ordering::Relaxed))
        }
        Combine::FanIn => {
            let mut partials = Vec::new();
            partials.try_reserve_exact(plan.num_chunks())?;
            plan.as_slice()
                .par_iter()
                .map(|chunk| {
                    let _span =
                        trace_span!("chunk", start = chunk.start, end = chunk.end).entered();
                    partial_sum(&sequence[chunk.range()])
                })
                .collect_into_vec(&mut partials);
            Ok(partials.iter().sum())
        }
    }
}

#[inline]
fn partial_sum(chunk: &[i32]) -> i64 {
    chunk.iter().map(|&x| i64::from(x)).sum()
}

/// Sum `sequence` in parallel with the default reducer on the global pool
pub fn reduce_sum(sequence: &[i32]) -> Result<i64, ReduceError> {
    ParallelReducer::<Autotune>::default().reduce_sum(sequence)
}

/// Sum `sequence` in one pass on the calling thread
///
/// Baseline for [`reduce_sum`]; both return the same value for every input.
pub fn sum_sequential(sequence: &[i32]) -> i64 {
    let mut sum = 0i64;
    for &x in sequence {
        sum += i64::from(x);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{Chunk, ChunkCount, FixedBlock, Halving, SplitError};

    /// Odd-sized chunks: 1, 2, 3, ... elements, the last one shorter
    struct Triangular;

    impl SplitPolicy for Triangular {
        fn split(&self, n: usize, _hint: usize) -> Result<ChunkPlan, ReduceError> {
            let mut chunks = Vec::new();
            let mut start = 0;
            let mut len = 1;
            while start < n {
                let end = (start + len).min(n);
                chunks.push(Chunk { start, end });
                start = end;
                len += 1;
            }
            Ok(ChunkPlan::from_chunks(n, chunks).expect("triangular chunks tile [0, n)"))
        }
    }

    /// Splits only the first half of the sequence
    struct HalfPlan;

    impl SplitPolicy for HalfPlan {
        fn split(&self, n: usize, hint: usize) -> Result<ChunkPlan, ReduceError> {
            FixedBlock::new(4).unwrap().split(n / 2, hint)
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(reduce_sum(&[]).unwrap(), 0);
        assert_eq!(sum_sequential(&[]), 0);
    }

    #[test]
    fn test_single_element() {
        assert_eq!(reduce_sum(&[42]).unwrap(), 42);
        assert_eq!(reduce_sum(&[-7]).unwrap(), -7);
        assert_eq!(sum_sequential(&[42]), 42);
    }

    #[test]
    fn test_mixed_signs() {
        let data = [1, -1, 2, -2, 3];
        assert_eq!(reduce_sum(&data).unwrap(), 3);
        assert_eq!(sum_sequential(&data), 3);
    }

    #[test]
    fn test_widening() {
        // Four i32::MAX values overflow i32 but not the i64 accumulator
        let data = [i32::MAX; 4];
        let expected = 4 * i64::from(i32::MAX);

        let reducer = ParallelReducer::new(FixedBlock::new(1).unwrap());
        assert_eq!(reducer.reduce_sum(&data).unwrap(), expected);
        assert_eq!(sum_sequential(&data), expected);
    }

    #[test]
    fn test_combine_strategies_agree() {
        let data: Vec<i32> = (-500..1500).collect();
        let expected = sum_sequential(&data);

        for combine in [Combine::Atomic, Combine::FanIn] {
            let reducer = ParallelReducer::new(ChunkCount::new(13).unwrap()).with_combine(combine);
            assert_eq!(
                reducer.reduce_sum(&data).unwrap(),
                expected,
                "Mismatch for {:?}",
                combine
            );
        }
    }

    #[test]
    fn test_dedicated_pool() {
        let reducer = ParallelReducer::new(Halving::new(16).unwrap())
            .with_threads(3)
            .unwrap();

        assert_eq!(reducer.workers(), 3);

        let data: Vec<i32> = (0..1000).collect();
        assert_eq!(reducer.reduce_sum(&data).unwrap(), 499_500);
    }

    #[test]
    fn test_shared_pool() {
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let a = ParallelReducer::<Autotune>::default().with_pool(Arc::clone(&pool));
        let b = ParallelReducer::new(FixedBlock::new(10).unwrap()).with_pool(pool);

        let data = vec![3; 100];
        assert_eq!(a.reduce_sum(&data).unwrap(), 300);
        assert_eq!(b.reduce_sum(&data).unwrap(), 300);
        assert_eq!(a.workers(), 2);
    }

    #[test]
    fn test_builder_accessors() {
        let reducer = ParallelReducer::new(ChunkCount::new(5).unwrap()).with_combine(Combine::FanIn);

        assert_eq!(reducer.policy().count(), 5);
        assert_eq!(reducer.combine(), Combine::FanIn);
        assert_eq!(ParallelReducer::<Autotune>::default().combine(), Combine::Atomic);
    }

    #[test]
    fn test_custom_policy() {
        let data: Vec<i32> = (1..=100).collect();
        let plan = Triangular.split(data.len(), 1).unwrap();
        assert_eq!(plan.num_chunks(), 14);

        for combine in [Combine::Atomic, Combine::FanIn] {
            let reducer = ParallelReducer::new(Triangular).with_combine(combine);
            assert_eq!(reducer.reduce_sum(&data).unwrap(), 5050);
        }
    }

    #[test]
    #[should_panic(expected = "wrong sequence length")]
    fn test_mismatched_plan_is_rejected() {
        let data = vec![1; 100];
        let _ = ParallelReducer::new(HalfPlan).reduce_sum(&data);
    }

    #[test]
    fn test_custom_chunks_must_tile() {
        let chunks = vec![Chunk { start: 0, end: 3 }, Chunk { start: 5, end: 8 }];
        assert_eq!(
            ChunkPlan::from_chunks(8, chunks),
            Err(SplitError::InvalidCover { n: 8, next: 3 })
        );
    }

    #[test]
    fn test_reduce_reports_exhaustion() {
        // A plan for usize::MAX chunks cannot be allocated
        let policy = FixedBlock::new(1).unwrap();
        let err = policy.split(usize::MAX, 1).unwrap_err();
        assert!(matches!(err, ReduceError::ResourceExhausted(_)));
        assert!(err.to_string().starts_with("resource exhausted: chunk allocation failed"));
    }

    #[test]
    fn test_resource_exhausted_message() {
        let err = ReduceError::ResourceExhausted("no threads".to_string());
        assert_eq!(err.to_string(), "resource exhausted: no threads");
    }
}
