// Async utility functions

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{Result, RuleEngineError};
use crate::utils::performance::Timer;

/// Runs a future with a timeout, returning `RuleEngineError::Timeout` if it
/// does not finish in time. The partial work of the future is dropped.
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    let timer = Timer::new();
    timeout(duration, future)
        .await
        .map_err(|_| RuleEngineError::Timeout {
            elapsed_ms: timer.elapsed_ms(),
        })
}

/// Runs `processor` over `items` in batches of `batch_size`, at most one
/// batch in flight. Results keep the input order.
pub async fn batch_process<T, R, F, Fut>(items: Vec<T>, batch_size: usize, processor: F) -> Vec<R>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let mut results = Vec::with_capacity(items.len());

    for chunk in items.chunks(batch_size.max(1)) {
        let futures: Vec<_> = chunk.iter().cloned().map(&processor).collect();

        let batch_results = futures::future::join_all(futures).await;
        results.extend(batch_results);
    }

    results
}
