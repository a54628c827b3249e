// Bounded fan-out: run one transfer per item with a hard concurrency ceiling

use crate::errors::TransferError;
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Append-only result sink shared by concurrent transfers
#[derive(Debug)]
pub struct Collector<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Collector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Partition of the input items after a fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutReport<T> {
    pub processed: Vec<T>,
    pub failed: Vec<(T, String)>,
    /// Items never started because the run was cancelled
    pub skipped: Vec<T>,
}

impl<T> FanOutReport<T> {
    pub fn total(&self) -> usize {
        self.processed.len() + self.failed.len() + self.skipped.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Concurrency-limited executor for per-item transfers
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    concurrency: usize,
}

impl FanOut {
    /// A ceiling of 0 is treated as 1
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Attempt every item once with at most `concurrency` transfers in
    /// flight. Per-item errors land in `failed`. After `cancel` fires no new
    /// item starts; running ones finish and are recorded.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.concurrency))]
    pub async fn run<T, F, Fut, E>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        transfer: F,
    ) -> FanOutReport<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let processed = Arc::new(Collector::new());
        let failed = Arc::new(Collector::new());
        let mut skipped = Vec::new();
        let transfer = Arc::new(transfer);
        let mut tasks = JoinSet::new();

        let mut pending = items.into_iter();
        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                skipped.push(item);
                skipped.extend(pending.by_ref());
                break;
            };

            let processed = Arc::clone(&processed);
            let failed = Arc::clone(&failed);
            let transfer = Arc::clone(&transfer);
            tasks.spawn(async move {
                let result = AssertUnwindSafe(transfer(item.clone())).catch_unwind().await;
                match result {
                    Ok(Ok(())) => processed.add(item),
                    Ok(Err(e)) => failed.add((item, e.to_string())),
                    Err(_) => failed.add((item, "transfer panicked".to_string())),
                }
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                // Panics are caught inside the task; only an aborted runtime gets here
                warn!(error = %e, "Transfer task did not complete");
            }
        }

        let report = FanOutReport {
            processed: processed.snapshot(),
            failed: failed.snapshot(),
            skipped,
        };

        debug!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Fan-out finished"
        );

        report
    }

    /// Like `run`, after building a shared client with `setup`. A setup
    /// failure fails the batch before any item starts.
    pub async fn run_with_setup<T, C, S, SE, F, Fut, E>(
        &self,
        setup: S,
        items: Vec<T>,
        cancel: &CancellationToken,
        transfer: F,
    ) -> Result<FanOutReport<T>, TransferError>
    where
        T: Clone + Send + Sync + 'static,
        C: Send + Sync + 'static,
        S: Future<Output = Result<C, SE>>,
        SE: Display,
        F: Fn(Arc<C>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let client = Arc::new(setup.await.map_err(|e| TransferError::Setup(e.to_string()))?);

        Ok(self
            .run(items, cancel, move |item| transfer(Arc::clone(&client), item))
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_collector_snapshot() {
        let collector = Collector::new();
        collector.add(1);
        collector.add(2);
        assert_eq!(collector.snapshot(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_partitions_successes_and_failures() {
        let fan_out = FanOut::new(3);
        let items: Vec<u32> = (0..10).collect();

        let report = fan_out
            .run(items, &CancellationToken::new(), |n| async move {
                if n % 3 == 0 {
                    Err(format!("item {} failed", n))
                } else {
                    Ok(())
                }
            })
            .await;

        let mut processed = report.processed.clone();
        processed.sort();
        assert_eq!(processed, vec![1, 2, 4, 5, 7, 8]);

        let mut failed: Vec<u32> = report.failed.iter().map(|(n, _)| *n).collect();
        failed.sort();
        assert_eq!(failed, vec![0, 3, 6, 9]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.total(), 10);
    }

    #[tokio::test]
    async fn test_ceiling_respected() {
        let fan_out = FanOut::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let report = fan_out
            .run((0..12).collect::<Vec<u32>>(), &CancellationToken::new(), move |_| {
                let in_flight = Arc::clone(&in_flight_c);
                let peak = Arc::clone(&peak_c);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
            .await;

        assert_eq!(report.processed.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = FanOut::new(4)
            .run(vec!["a", "b", "c"], &cancel, |_| async { Ok::<(), String>(()) })
            .await;

        assert!(report.processed.is_empty());
        assert_eq!(report.skipped, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_started_items() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        // Ceiling 1: the first item cancels the run while holding the only permit
        let report = FanOut::new(1)
            .run((0..5).collect::<Vec<u32>>(), &cancel, move |n| {
                let trigger = trigger.clone();
                async move {
                    if n == 0 {
                        trigger.cancel();
                    }
                    Ok::<(), String>(())
                }
            })
            .await;

        assert_eq!(report.processed, vec![0]);
        assert_eq!(report.skipped, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_transfer_recorded_as_failure() {
        let report = FanOut::new(2)
            .run(vec![1u32, 2], &CancellationToken::new(), |n| async move {
                if n == 2 {
                    panic!("boom");
                }
                Ok::<(), String>(())
            })
            .await;

        assert_eq!(report.processed, vec![1]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2);
    }

    #[tokio::test]
    async fn test_setup_failure_is_batch_error() {
        let result = FanOut::new(2)
            .run_with_setup(
                async { Err::<(), _>("no client") },
                vec![1u32, 2, 3],
                &CancellationToken::new(),
                |_client, _n| async { Ok::<(), String>(()) },
            )
            .await;

        assert!(matches!(result, Err(TransferError::Setup(msg)) if msg == "no client"));
    }

    #[tokio::test]
    async fn test_setup_client_shared_by_transfers() {
        let report = FanOut::new(2)
            .run_with_setup(
                async { Ok::<_, String>(AtomicUsize::new(0)) },
                vec![1u32, 2, 3],
                &CancellationToken::new(),
                |client, _n| async move {
                    client.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                },
            )
            .await
            .unwrap();

        assert_eq!(report.processed.len(), 3);
    }
}
