//! Shardsum: deterministic parallel summation of integer sequences
//!
//! This crate splits a read-only integer sequence into contiguous chunks,
//! sums each chunk on a rayon worker, and combines the partial sums through a
//! relaxed atomic accumulator. The total is identical to a sequential sum
//! whatever the chunking or the scheduling order.

pub mod chunks;
pub mod reduce;

// Re-export main types at crate root
pub use chunks::{
    Autotune, AutotuneConfig, Chunk, ChunkCount, ChunkPlan, FixedBlock, Halving, SplitError,
    SplitPolicy,
};
pub use reduce::{reduce_sum, sum_sequential, Combine, ParallelReducer, ReduceError};
