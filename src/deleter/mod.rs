//! Delete workers and the delete operation they drive.
//!
//! A [`DeleteWorker`] owns one batch at a time and keeps retrying it until it
//! succeeds or fails fatally. Every attempt is paced by the shared
//! [`IntervalRateLimiter`] and bounded by the shared [`ConcurrencyLimiter`],
//! and every outcome is fed back into both.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::limiter::{ConcurrencyLimiter, IntervalRateLimiter, Permit};
use crate::stage::Stage;
use crate::types::error::{DeleteError, S3BulkDeleteError, Severity};
use crate::types::{Batch, BatchStatistics};

pub mod batch;

pub use batch::BatchDeleter;

/// The destructive operation applied to each batch.
#[async_trait]
pub trait Deleter: Send + Sync {
    /// Delete every key in `keys` with a single request.
    async fn delete(&self, keys: &[String]) -> Result<(), DeleteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    Completed,
    Cancelled,
}

/// Pipeline worker: receives batches and deletes them under both limiters.
///
/// Workers share the batch queue (MPMC), so batches are spread over whichever
/// worker is free. Completed batch numbers go to the completion queue.
pub struct DeleteWorker {
    worker_index: u16,
    stage: Stage<Batch, u64>,
    deleter: Arc<dyn Deleter>,
    rate_limiter: Arc<IntervalRateLimiter>,
    concurrency_limiter: ConcurrencyLimiter,
}

impl DeleteWorker {
    pub fn new(
        worker_index: u16,
        stage: Stage<Batch, u64>,
        deleter: Arc<dyn Deleter>,
        rate_limiter: Arc<IntervalRateLimiter>,
        concurrency_limiter: ConcurrencyLimiter,
    ) -> Self {
        Self {
            worker_index,
            stage,
            deleter,
            rate_limiter,
            concurrency_limiter,
        }
    }

    pub async fn run(&self) -> Result<()> {
        debug!(worker_index = self.worker_index, "delete worker started.");

        loop {
            let Some(batch) = self.stage.recv().await else {
                break;
            };

            if self.delete_batch(batch).await? == BatchOutcome::Cancelled {
                break;
            }
        }

        if self.stage.cancellation_token.is_cancelled() {
            info!(
                worker_index = self.worker_index,
                "delete worker has been cancelled."
            );
        } else {
            debug!(
                worker_index = self.worker_index,
                "delete worker has been completed."
            );
        }
        Ok(())
    }

    async fn delete_batch(&self, batch: Batch) -> Result<BatchOutcome> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let Some(permit) = self.admit().await else {
                return Ok(BatchOutcome::Cancelled);
            };

            self.stage
                .send_stats(BatchStatistics::BatchStart {
                    number: batch.number,
                })
                .await;
            info!(
                worker_index = self.worker_index,
                batch = batch.number,
                objects = batch.len(),
                attempt = attempt,
                "deleting batch."
            );

            let result = tokio::select! {
                biased;
                _ = self.stage.cancellation_token.cancelled() => {
                    debug!(
                        worker_index = self.worker_index,
                        batch = batch.number,
                        "in-flight delete has been abandoned."
                    );
                    return Ok(BatchOutcome::Cancelled);
                }
                result = self.deleter.delete(&batch.items) => result,
            };

            let success = result.is_ok();
            self.rate_limiter.report(success);
            self.concurrency_limiter.report(permit, success);

            let e = match result {
                Ok(()) => {
                    self.complete(&batch).await?;
                    return Ok(BatchOutcome::Completed);
                }
                Err(e) => e,
            };

            match e.severity() {
                Severity::Transient => {
                    warn!(
                        worker_index = self.worker_index,
                        batch = batch.number,
                        attempt = attempt,
                        error = %e,
                        "batch delete failed. retrying."
                    );
                    self.stage
                        .send_stats(BatchStatistics::BatchRetry {
                            number: batch.number,
                        })
                        .await;
                }
                Severity::Fatal => return Err(self.abort(&batch, e).await),
            }
        }
    }

    /// Wait for a start slot, then for a permit. `None` if the run is
    /// cancelled meanwhile.
    async fn admit(&self) -> Option<Permit> {
        tokio::select! {
            biased;
            _ = self.stage.cancellation_token.cancelled() => return None,
            _ = self.rate_limiter.check_wait() => {}
        }

        tokio::select! {
            biased;
            _ = self.stage.cancellation_token.cancelled() => None,
            permit = self.concurrency_limiter.acquire() => Some(permit),
        }
    }

    async fn complete(&self, batch: &Batch) -> Result<()> {
        // Completions bypass cancellation: a deleted batch must reach the
        // completion log even when another worker has just aborted the run.
        let sender = self
            .stage
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("delete worker has no completion queue."))?;
        if sender.send(batch.number).await.is_err() {
            warn!(
                worker_index = self.worker_index,
                batch = batch.number,
                "completion queue has been closed. batch is not recorded."
            );
        }

        info!(
            worker_index = self.worker_index,
            batch = batch.number,
            objects = batch.len(),
            "deleted batch."
        );
        self.stage
            .send_stats(BatchStatistics::BatchComplete {
                number: batch.number,
                objects: batch.len() as u64,
            })
            .await;
        Ok(())
    }

    async fn abort(&self, batch: &Batch, e: DeleteError) -> anyhow::Error {
        let messages = e.messages();
        for message in &messages {
            error!(
                worker_index = self.worker_index,
                batch = batch.number,
                "[batch {}] {}",
                batch.number,
                message
            );
        }

        self.stage
            .send_stats(BatchStatistics::BatchError {
                number: batch.number,
            })
            .await;
        self.stage.cancellation_token.cancel();

        anyhow!(S3BulkDeleteError::RemoteRejected {
            batch: batch.number,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::{
        MockDeleter, init_dummy_tracing_subscriber, make_item_error, make_test_config,
    };
    use crate::types::error::exit_code_from_error;
    use crate::types::token::create_pipeline_cancellation_token;
    use async_channel::Receiver;
    use std::time::Duration;

    struct Harness {
        worker: DeleteWorker,
        completions: Receiver<u64>,
        stats: Receiver<BatchStatistics>,
        rate_limiter: Arc<IntervalRateLimiter>,
        concurrency_limiter: ConcurrencyLimiter,
    }

    async fn harness(config: Config, batches: Vec<Batch>, deleter: MockDeleter) -> Harness {
        let (batch_sender, batch_receiver) = async_channel::unbounded();
        let (completion_sender, completion_receiver) = async_channel::unbounded();
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        for batch in batches {
            batch_sender.send(batch).await.unwrap();
        }
        batch_sender.close();

        let rate_limiter = Arc::new(IntervalRateLimiter::new(
            config.base_interval(),
            config.max_interval(),
        ));
        let concurrency_limiter = ConcurrencyLimiter::new(
            config.effective_worker_size() as usize,
            config.restore_delay(),
        );

        let stage = Stage::new(
            config,
            Some(batch_receiver),
            Some(completion_sender),
            stats_sender,
            create_pipeline_cancellation_token(),
        );

        Harness {
            worker: DeleteWorker::new(
                0,
                stage,
                Arc::new(deleter),
                rate_limiter.clone(),
                concurrency_limiter.clone(),
            ),
            completions: completion_receiver,
            stats: stats_receiver,
            rate_limiter,
            concurrency_limiter,
        }
    }

    fn make_batches(sizes: &[usize]) -> Vec<Batch> {
        let mut offset = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let items = (offset..offset + size).map(|i| format!("key-{i}")).collect();
                offset += size;
                Batch::new(index as u64 + 1, items)
            })
            .collect()
    }

    fn drain<T>(receiver: &Receiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            items.push(item);
        }
        items
    }

    fn retryable() -> DeleteError {
        DeleteError::rejected(vec![make_item_error(
            "key-0",
            "InternalError",
            "We encountered an internal error. Please try again.",
        )])
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_every_batch_once() {
        init_dummy_tracing_subscriber();

        let deleter = MockDeleter::always_ok();
        let h = harness(
            make_test_config(),
            make_batches(&[1000, 1000, 500]),
            deleter.clone(),
        )
        .await;

        h.worker.run().await.unwrap();

        assert_eq!(drain(&h.completions), vec![1, 2, 3]);
        let sizes: Vec<usize> = deleter.calls().iter().map(|c| c.keys.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(!h.worker.stage.cancellation_token.is_cancelled());

        let stats = drain(&h.stats);
        assert_eq!(stats[0], BatchStatistics::BatchStart { number: 1 });
        assert_eq!(
            stats[1],
            BatchStatistics::BatchComplete {
                number: 1,
                objects: 1000
            }
        );
        assert_eq!(stats.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced_by_base_interval() {
        let deleter = MockDeleter::always_ok();
        let h = harness(make_test_config(), make_batches(&[10, 10, 10]), deleter.clone()).await;

        h.worker.run().await.unwrap();

        let calls = deleter.calls();
        for pair in calls.windows(2) {
            assert_eq!(pair[1].at - pair[0].at, Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_same_batch_with_widening_spacing() {
        init_dummy_tracing_subscriber();

        let deleter = MockDeleter::new(|_, index| if index < 3 { Err(retryable()) } else { Ok(()) });
        let h = harness(make_test_config(), make_batches(&[10]), deleter.clone()).await;

        h.worker.run().await.unwrap();

        let calls = deleter.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|c| c.keys == calls[0].keys));

        let gaps: Vec<Duration> = calls.windows(2).map(|p| p[1].at - p[0].at).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );

        assert_eq!(drain(&h.completions), vec![1]);
        assert_eq!(h.rate_limiter.fail_count(), 2);

        let retries = drain(&h.stats)
            .into_iter()
            .filter(|s| matches!(s, BatchStatistics::BatchRetry { number: 1 }))
            .count();
        assert_eq!(retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried() {
        let deleter = MockDeleter::new(|_, index| {
            if index == 0 {
                Err(DeleteError::Transport("dispatch failure".to_string()))
            } else {
                Ok(())
            }
        });
        let h = harness(make_test_config(), make_batches(&[5]), deleter.clone()).await;

        h.worker.run().await.unwrap();
        assert_eq!(deleter.call_count(), 2);
        assert_eq!(drain(&h.completions), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_rejection_cancels_run_and_stops_further_batches() {
        init_dummy_tracing_subscriber();

        let deleter = MockDeleter::new(|keys, _| {
            Err(DeleteError::rejected(vec![make_item_error(
                &keys[0],
                "AccessDenied",
                "Access Denied",
            )]))
        });
        let h = harness(make_test_config(), make_batches(&[10, 10]), deleter.clone()).await;

        let err = h.worker.run().await.unwrap_err();
        assert_eq!(exit_code_from_error(&err), 2);
        assert_eq!(
            err.downcast_ref::<S3BulkDeleteError>(),
            Some(&S3BulkDeleteError::RemoteRejected {
                batch: 1,
                messages: vec!["key-0: Access Denied".to_string()],
            })
        );

        assert!(h.worker.stage.cancellation_token.is_cancelled());
        assert_eq!(deleter.call_count(), 1);
        assert!(drain(&h.completions).is_empty());
        assert!(drain(&h.stats).contains(&BatchStatistics::BatchError { number: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_feed_both_limiters() {
        let deleter = MockDeleter::new(|_, index| if index == 0 { Err(retryable()) } else { Ok(()) });
        let h = harness(make_test_config(), make_batches(&[10]), deleter).await;

        h.worker.run().await.unwrap();

        // One failure then one success: net zero on the interval limiter.
        assert_eq!(h.rate_limiter.fail_count(), 0);
        let snapshot = h.concurrency_limiter.snapshot();
        assert_eq!(snapshot.total(), 4);
        assert_eq!(snapshot.active, 0);

        h.concurrency_limiter
            .wait_done(Duration::from_millis(200))
            .await;
        assert_eq!(h.concurrency_limiter.snapshot().available, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_worker_does_not_delete() {
        let deleter = MockDeleter::always_ok();
        let h = harness(make_test_config(), make_batches(&[10, 10]), deleter.clone()).await;
        h.worker.stage.cancellation_token.cancel();

        h.worker.run().await.unwrap();
        assert_eq!(deleter.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn serial_workers_share_one_permit() {
        let mut config = make_test_config();
        config.serial = true;

        let deleter = MockDeleter::always_ok();
        let h = harness(config, make_batches(&[3, 3]), deleter.clone()).await;
        assert_eq!(h.concurrency_limiter.capacity(), 1);

        h.worker.run().await.unwrap();
        assert_eq!(drain(&h.completions), vec![1, 2]);
    }
}
