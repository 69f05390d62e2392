use std::collections::BTreeSet;

use anyhow::Result;
use async_channel::Receiver;
use tracing::{debug, warn};

use crate::resume::CompletionLog;

/// Batch numbers known to have been deleted during this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRecord {
    completed: BTreeSet<u64>,
}

impl CompletionRecord {
    pub fn insert(&mut self, batch_number: u64) -> bool {
        self.completed.insert(batch_number)
    }

    pub fn contains(&self, batch_number: u64) -> bool {
        self.completed.contains(&batch_number)
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Completed batch numbers in ascending order.
    pub fn batch_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.completed.iter().copied()
    }
}

/// Final stage of the pipeline. Records every completed batch and persists it
/// to the completion log when one is configured.
///
/// The tracker deliberately ignores cancellation: batches that finished before
/// a fatal error must still reach the completion log so the next run can skip
/// them. It stops once every worker has dropped its completion sender.
pub struct CompletionTracker {
    receiver: Receiver<u64>,
    log: Option<CompletionLog>,
}

impl CompletionTracker {
    pub fn new(receiver: Receiver<u64>, log: Option<CompletionLog>) -> Self {
        Self { receiver, log }
    }

    pub async fn track(mut self) -> Result<CompletionRecord> {
        debug!("completion tracker has started.");

        let mut record = CompletionRecord::default();
        while let Ok(batch_number) = self.receiver.recv().await {
            if !record.insert(batch_number) {
                warn!(batch = batch_number, "batch has been completed twice.");
                continue;
            }
            if let Some(log) = self.log.as_mut() {
                log.append(batch_number).await?;
            }
        }

        debug!(
            completed = record.len(),
            "completion tracker has been completed."
        );
        Ok(record)
    }
}
