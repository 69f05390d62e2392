use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use crate::stage::{SendResult, Stage};
use crate::types::{Batch, BatchStatistics};

/// Groups the identifier stream into numbered batches of at most
/// `batch_size` items.
///
/// Numbers start at 1 and advance for every batch built, including batches
/// listed in the skip set. A skipped batch is dropped here and never reaches
/// a worker.
pub struct Batcher {
    stage: Stage<String, Batch>,
    batch_size: usize,
    skip: HashSet<u64>,
}

/// Counts reported when the batcher finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherReport {
    pub batches: u64,
    pub skipped: u64,
}

impl Batcher {
    pub fn new(stage: Stage<String, Batch>, skip: HashSet<u64>) -> Self {
        let batch_size = (stage.config.batch_size as usize).max(1);
        Self {
            stage,
            batch_size,
            skip,
        }
    }

    pub async fn run(&self) -> Result<BatcherReport> {
        debug!(batch_size = self.batch_size, "batcher has started.");

        let mut report = BatcherReport::default();

        loop {
            let Some(items) = self.next_items().await else {
                debug!("batcher has been cancelled.");
                return Ok(report);
            };
            if items.is_empty() {
                break;
            }

            report.batches += 1;
            let batch = Batch::new(report.batches, items);

            if self.skip.contains(&batch.number) {
                report.skipped += 1;
                info!(batch = batch.number, objects = batch.len(), "skipped batch.");
                self.stage
                    .send_stats(BatchStatistics::BatchSkip {
                        number: batch.number,
                    })
                    .await;
                continue;
            }

            if self.stage.send(batch).await? == SendResult::Closed {
                debug!("batch queue has been closed.");
                return Ok(report);
            }
        }

        self.stage.close_sender();
        debug!(
            batches = report.batches,
            skipped = report.skipped,
            "batcher has been completed."
        );
        Ok(report)
    }

    /// Pull up to `batch_size` identifiers. An empty vector means the input is
    /// exhausted. `None` means the run was cancelled.
    async fn next_items(&self) -> Option<Vec<String>> {
        let mut items = Vec::with_capacity(self.batch_size);
        while items.len() < self.batch_size {
            match self.stage.recv().await {
                Some(item) => items.push(item),
                None => break,
            }
        }

        if self.stage.cancellation_token.is_cancelled() {
            return None;
        }
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::init_dummy_tracing_subscriber;
    use crate::types::token::create_pipeline_cancellation_token;
    use async_channel::Receiver;
    use proptest::prelude::*;

    struct Harness {
        batcher: Batcher,
        batches: Receiver<Batch>,
        stats: Receiver<BatchStatistics>,
    }

    async fn harness(identifiers: usize, batch_size: u16, skip: HashSet<u64>) -> Harness {
        let (input_sender, input_receiver) = async_channel::unbounded();
        let (batch_sender, batch_receiver) = async_channel::unbounded();
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        for i in 0..identifiers {
            input_sender.send(format!("key-{i}")).await.unwrap();
        }
        input_sender.close();

        let mut config = Config::default();
        config.batch_size = batch_size;
        let stage = Stage::new(
            config,
            Some(input_receiver),
            Some(batch_sender),
            stats_sender,
            create_pipeline_cancellation_token(),
        );

        Harness {
            batcher: Batcher::new(stage, skip),
            batches: batch_receiver,
            stats: stats_receiver,
        }
    }

    async fn collect(receiver: &Receiver<Batch>) -> Vec<Batch> {
        let mut batches = Vec::new();
        while let Ok(batch) = receiver.recv().await {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test]
    async fn splits_input_into_full_batches_and_remainder() {
        init_dummy_tracing_subscriber();

        let h = harness(2500, 1000, HashSet::new()).await;
        let report = h.batcher.run().await.unwrap();
        let batches = collect(&h.batches).await;

        assert_eq!(report, BatcherReport { batches: 3, skipped: 0 });
        assert_eq!(
            batches.iter().map(|b| (b.number, b.len())).collect::<Vec<_>>(),
            vec![(1, 1000), (2, 1000), (3, 500)]
        );
        assert_eq!(batches[0].items[0], "key-0");
        assert_eq!(batches[2].items[499], "key-2499");
    }

    #[tokio::test]
    async fn empty_input_produces_no_batches() {
        let h = harness(0, 10, HashSet::new()).await;
        let report = h.batcher.run().await.unwrap();

        assert_eq!(report, BatcherReport::default());
        assert!(collect(&h.batches).await.is_empty());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_batch() {
        let h = harness(20, 10, HashSet::new()).await;
        h.batcher.run().await.unwrap();

        let batches = collect(&h.batches).await;
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 10));
    }

    #[tokio::test]
    async fn skipped_batches_keep_their_numbers() {
        init_dummy_tracing_subscriber();

        let h = harness(50, 10, HashSet::from([2, 4])).await;
        let report = h.batcher.run().await.unwrap();
        let batches = collect(&h.batches).await;

        assert_eq!(report, BatcherReport { batches: 5, skipped: 2 });
        assert_eq!(
            batches.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        // Batch 3 still starts where it would have without skipping.
        assert_eq!(batches[1].items[0], "key-20");

        h.stats.close();
        let mut stats = Vec::new();
        while let Ok(stat) = h.stats.recv().await {
            stats.push(stat);
        }
        assert_eq!(
            stats,
            vec![
                BatchStatistics::BatchSkip { number: 2 },
                BatchStatistics::BatchSkip { number: 4 },
            ]
        );
    }

    #[tokio::test]
    async fn skipping_everything_sends_nothing() {
        let h = harness(30, 10, HashSet::from([1, 2, 3])).await;
        let report = h.batcher.run().await.unwrap();

        assert_eq!(report.skipped, 3);
        assert!(collect(&h.batches).await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_batcher_drops_partial_batch() {
        let h = harness(5, 10, HashSet::new()).await;
        h.batcher.stage.cancellation_token.cancel();

        let report = h.batcher.run().await.unwrap();
        assert_eq!(report.batches, 0);
        assert!(h.batches.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn batch_count_and_sizes(identifiers in 0usize..400, batch_size in 1u16..50) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let batches = runtime.block_on(async {
                let h = harness(identifiers, batch_size, HashSet::new()).await;
                h.batcher.run().await.unwrap();
                collect(&h.batches).await
            });

            let b = batch_size as usize;
            prop_assert_eq!(batches.len(), identifiers.div_ceil(b));
            for (index, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.number, index as u64 + 1);
                if index + 1 < batches.len() {
                    prop_assert_eq!(batch.len(), b);
                }
            }
            if let Some(last) = batches.last() {
                let expected = if identifiers % b == 0 { b } else { identifiers % b };
                prop_assert_eq!(last.len(), expected);
            }
            let total: usize = batches.iter().map(Batch::len).sum();
            prop_assert_eq!(total, identifiers);
        }

        #[test]
        fn skipped_numbers_never_reach_workers(
            identifiers in 1usize..300,
            batch_size in 1u16..20,
            skip in proptest::collection::hash_set(1u64..40, 0..10),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let batches = runtime.block_on(async {
                let h = harness(identifiers, batch_size, skip.clone()).await;
                h.batcher.run().await.unwrap();
                collect(&h.batches).await
            });

            let total = identifiers.div_ceil(batch_size as usize) as u64;
            let expected: Vec<u64> = (1..=total).filter(|n| !skip.contains(n)).collect();
            prop_assert_eq!(
                batches.iter().map(|b| b.number).collect::<Vec<_>>(),
                expected
            );
        }
    }
}
