//! Bounded concurrent fan-out/fan-in
//!
//! Every item gets its own future; a semaphore bounds how many run their worker at once.
//! Results come back paired with their items in input order, whatever order they finish in.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidLimit(usize),
}

/// One input item and what its worker produced
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult<T, R> {
    pub item: T,
    pub outcome: Result<R, String>,
}

impl<T, R> DispatchResult<T, R> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A fan-out gate with a fixed number of permits
#[derive(Debug, Clone)]
pub struct Dispatcher {
    limit: usize,
}

impl Dispatcher {
    /// Rejects a zero limit up front
    pub fn new(limit: usize) -> Result<Self, DispatchError> {
        if limit == 0 {
            return Err(DispatchError::InvalidLimit(limit));
        }
        Ok(Self { limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `worker` over every item, at most `limit` at a time
    ///
    /// A failing or panicking worker only affects its own result slot.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<DispatchResult<T, R>>
    where
        T: Clone,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        debug!(items = items.len(), limit = self.limit, "Dispatcher::run: called");
        if items.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.limit));
        let worker = &worker;
        let tasks = items.iter().enumerate().map(|(index, item)| {
            let semaphore = semaphore.clone();
            let item = item.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(format!("dispatch gate closed: {}", e)),
                };
                match AssertUnwindSafe(worker(item)).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        warn!(index, error = %e, "Dispatcher::run: item failed");
                        Err(e.to_string())
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(index, %message, "Dispatcher::run: item panicked");
                        Err(format!("worker panicked: {}", message))
                    }
                }
            }
        });

        let outcomes = join_all(tasks).await;
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        debug!(total = outcomes.len(), failed, "Dispatcher::run: all items finished");

        items
            .into_iter()
            .zip(outcomes)
            .map(|(item, outcome)| DispatchResult { item, outcome })
            .collect()
    }
}

/// Fan `items` out over `worker` with at most `limit` in flight
pub async fn dispatch<T, R, E, F, Fut>(
    items: Vec<T>,
    worker: F,
    limit: usize,
) -> Result<Vec<DispatchResult<T, R>>, DispatchError>
where
    T: Clone,
    E: Display,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let dispatcher = Dispatcher::new(limit)?;
    Ok(dispatcher.run(items, worker).await)
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    async fn sleepy(ms: u64) -> Result<u64, String> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_is_batches_times_duration() {
        for (n, k, expected_ms) in [(6usize, 2usize, 300u64), (5, 2, 300), (4, 4, 100), (3, 1, 300)] {
            let started = Instant::now();
            let results = dispatch(vec![100u64; n], sleepy, k).await.unwrap();
            assert_eq!(results.len(), n);
            assert_eq!(started.elapsed(), Duration::from_millis(expected_ms), "n={} k={}", n, k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_limit() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = dispatch(
            (0..10u64).collect(),
            |i| {
                let active = &active;
                let peak = &peak;
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(i)
                }
            },
            3,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_and_panics_stay_in_their_slot() {
        let results = dispatch(
            vec![1, 2, 3, 4],
            |i| async move {
                match i {
                    2 => Err(format!("item {} broke", i)),
                    3 => panic!("boom"),
                    _ => Ok(i * 10),
                }
            },
            2,
        )
        .await
        .unwrap();

        assert_eq!(results[0].outcome, Ok(10));
        assert_eq!(results[1].outcome, Err("item 2 broke".to_string()));
        assert_eq!(results[2].outcome, Err("worker panicked: boom".to_string()));
        assert_eq!(results[3].outcome, Ok(40));
        assert_eq!(results.iter().map(|r| r.item).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_items_return_immediately() {
        let results = dispatch(Vec::<u64>::new(), sleepy, 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let err = dispatch(vec![1u64], sleepy, 0).await.unwrap_err();
        assert_eq!(err, DispatchError::InvalidLimit(0));
        assert!(Dispatcher::new(0).is_err());
    }

    proptest! {
        #[test]
        fn prop_results_match_inputs_positionally(
            delays in proptest::collection::vec(0u64..50, 0..24),
            limit in 1usize..6,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let items: Vec<(usize, u64)> = delays.iter().copied().enumerate().collect();
            let results = rt.block_on(dispatch(
                items.clone(),
                |(index, delay)| async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if delay % 7 == 0 {
                        Err(format!("failed {}", index))
                    } else {
                        Ok(index * 2)
                    }
                },
                limit,
            )).unwrap();

            prop_assert_eq!(results.len(), items.len());
            for (i, result) in results.iter().enumerate() {
                prop_assert_eq!(result.item, items[i]);
                match &result.outcome {
                    Ok(v) => prop_assert_eq!(*v, i * 2),
                    Err(e) => prop_assert_eq!(e, &format!("failed {}", i)),
                }
            }
        }
    }
}
