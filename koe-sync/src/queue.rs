//! Bounded concurrency queue
//!
//! Admits at most `limit` in-flight asynchronous tasks from an unbounded
//! backlog; as soon as one settles the next queued task is started. The queue
//! limits outstanding I/O operations, not CPU threads — all work is
//! cooperatively scheduled on the tokio runtime.
//!
//! The queue is failure-agnostic: tasks that can fail return `Result` and
//! their errors are captured per task; one task's failure never cancels its
//! siblings. Callers decide whether a partial failure is fatal.

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Semaphore-gated task queue with a fixed concurrency limit
#[derive(Debug, Clone)]
pub struct TaskQueue {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl TaskQueue {
    /// Create a queue admitting at most `limit` concurrent tasks.
    /// A limit of zero is clamped to one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wrap a task so it runs only once the queue admits it.
    ///
    /// The returned future owns its admission permit for the duration of the
    /// task; dropping it before completion releases the slot.
    pub fn enqueue<F>(&self, task: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let semaphore = Arc::clone(&self.semaphore);
        async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("queue semaphore is never closed");
            task.await
        }
    }

    /// Run every task, at most `limit` in flight, and collect the outputs in
    /// the caller's original order regardless of settlement order.
    pub async fn run_all<F>(&self, tasks: impl IntoIterator<Item = F>) -> Vec<F::Output>
    where
        F: Future,
    {
        future::join_all(tasks.into_iter().map(|task| self.enqueue(task))).await
    }

    /// Run every task, yielding `(input_index, output)` pairs in settlement
    /// order. Used where per-item completion must be observed as it happens
    /// rather than as an ordered aggregate.
    pub fn run_unordered<'a, F, I>(
        &'a self,
        tasks: I,
    ) -> impl Stream<Item = (usize, F::Output)> + 'a
    where
        F: Future + 'a,
        I: IntoIterator<Item = F>,
        I::IntoIter: 'a,
    {
        let gated: Vec<_> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let gated = self.enqueue(task);
                async move { (index, gated.await) }
            })
            .collect();
        stream::iter(gated).buffer_unordered(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let queue = TaskQueue::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let results = queue.run_all(tasks).await;
        assert_eq!(results.len(), 20);
        assert!(max_active.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_run_all_preserves_input_order() {
        let queue = TaskQueue::new(3);

        // Decreasing delays: later tasks settle first
        let tasks: Vec<_> = [30u64, 20, 10]
            .iter()
            .enumerate()
            .map(|(i, &delay)| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                i
            })
            .collect();

        let results = queue.run_all(tasks).await;
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_cancel_siblings() {
        let queue = TaskQueue::new(2);

        let tasks: Vec<_> = (0..3)
            .map(|i| async move {
                if i == 1 {
                    Err(format!("task {} failed", i))
                } else {
                    Ok(i)
                }
            })
            .collect();

        let results = queue.run_all(tasks).await;
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Err("task 1 failed".to_string()));
        assert_eq!(results[2], Ok(2));
    }

    #[tokio::test]
    async fn test_run_unordered_yields_in_settlement_order() {
        let queue = TaskQueue::new(3);

        let tasks: Vec<_> = [30u64, 20, 10]
            .iter()
            .map(|&delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay
            })
            .collect();

        let settled: Vec<(usize, u64)> = queue.run_unordered(tasks).collect().await;
        assert_eq!(settled.len(), 3);
        // Shortest delay settles first, input indices are preserved alongside
        assert_eq!(settled[0], (2, 10));
        assert_eq!(settled[2], (0, 30));
    }

    #[tokio::test]
    async fn test_zero_limit_clamped() {
        let queue = TaskQueue::new(0);
        assert_eq!(queue.limit(), 1);
        let results = queue
            .run_all(vec![
                futures::FutureExt::boxed(async { 1 }),
                futures::FutureExt::boxed(async { 2 }),
            ])
            .await;
        assert_eq!(results, vec![1, 2]);
    }
}
