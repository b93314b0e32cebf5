//! Times a sequential and a parallel sum over ten million ones.
//!
//! Set `RUST_LOG=shardsum=debug` to see the chunk plan of each reduction.

use std::hint::black_box;
use std::time::Instant;

use shardsum::{reduce_sum, sum_sequential, ReduceError};
use tracing_subscriber::EnvFilter;

const N: usize = 10_000_000;

fn main() -> Result<(), ReduceError> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let data = vec![1i32; N];

    let start = Instant::now();
    let sequential = sum_sequential(black_box(&data));
    let duration = start.elapsed();
    println!(
        "Time without parallelism: {} seconds.",
        duration.as_secs_f64()
    );

    let start = Instant::now();
    let parallel = reduce_sum(black_box(&data))?;
    let duration = start.elapsed();
    println!("Time with parallelism: {} seconds.", duration.as_secs_f64());

    tracing::info!(sequential, parallel, "sums computed");
    Ok(())
}
