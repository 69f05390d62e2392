use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::types::BatchStatistics;
use crate::types::token::PipelineCancellationToken;

/// Result of sending an item to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// - Channels connect stages: each stage reads from `receiver` and writes to `sender`
/// - The reader stage has no `receiver` (it's the pipeline entry point)
/// - The completion tracker has no `sender` (it's the pipeline exit)
///
/// Each stage takes ownership of a `Stage`, consuming it during pipeline construction.
pub struct Stage<In, Out> {
    pub config: Config,
    pub receiver: Option<Receiver<In>>,
    pub sender: Option<Sender<Out>>,
    pub stats_sender: Sender<BatchStatistics>,
    pub cancellation_token: PipelineCancellationToken,
}

impl<In, Out> Stage<In, Out> {
    pub fn new(
        config: Config,
        receiver: Option<Receiver<In>>,
        sender: Option<Sender<Out>>,
        stats_sender: Sender<BatchStatistics>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            receiver,
            sender,
            stats_sender,
            cancellation_token,
        }
    }

    /// Send an item to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// or the run has been cancelled, allowing the caller to exit gracefully.
    pub async fn send(&self, item: Out) -> Result<SendResult> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("stage has no downstream channel."))?;

        let result = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Ok(SendResult::Closed),
            result = sender.send(item) => result.map_err(|_| anyhow!("async_channel::Sender::send() failed.")),
        };

        if let Err(e) = result {
            return if !sender.is_closed() {
                Err(e)
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Receive the next item, or `None` once the upstream channel is drained
    /// and closed or the run has been cancelled.
    pub async fn recv(&self) -> Option<In> {
        let receiver = self.receiver.as_ref()?;

        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => None,
            item = receiver.recv() => item.ok(),
        }
    }

    /// Send a statistics event. Events are dropped once the indicator is gone.
    pub async fn send_stats(&self, stats: BatchStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    /// Close the downstream channel so the next stage sees end of input.
    pub fn close_sender(&self) {
        if let Some(sender) = self.sender.as_ref() {
            sender.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::token::create_pipeline_cancellation_token;

    fn stage_with_channels() -> (
        Stage<u64, u64>,
        Sender<u64>,
        Receiver<u64>,
        Receiver<BatchStatistics>,
    ) {
        let (input_sender, input_receiver) = async_channel::bounded(4);
        let (output_sender, output_receiver) = async_channel::bounded(4);
        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let stage = Stage::new(
            Config::default(),
            Some(input_receiver),
            Some(output_sender),
            stats_sender,
            create_pipeline_cancellation_token(),
        );
        (stage, input_sender, output_receiver, stats_receiver)
    }

    #[tokio::test]
    async fn forwards_items() {
        let (stage, input, output, _stats) = stage_with_channels();

        input.send(7).await.unwrap();
        let item = stage.recv().await.unwrap();
        assert_eq!(stage.send(item).await.unwrap(), SendResult::Success);
        assert_eq!(output.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn send_reports_closed_channel() {
        let (stage, _input, output, _stats) = stage_with_channels();
        output.close();

        assert_eq!(stage.send(1).await.unwrap(), SendResult::Closed);
    }

    #[tokio::test]
    async fn send_reports_closed_when_cancelled() {
        let (stage, _input, _output, _stats) = stage_with_channels();
        for item in 0..4 {
            stage.send(item).await.unwrap();
        }
        stage.cancellation_token.cancel();

        // The channel is full; cancellation must still unblock the send.
        assert_eq!(stage.send(5).await.unwrap(), SendResult::Closed);
    }

    #[tokio::test]
    async fn send_places_no_bounds_on_items() {
        let (output_sender, output_receiver) = async_channel::bounded(1);
        let (stats_sender, _stats_receiver) = async_channel::unbounded();
        let stage: Stage<(), std::rc::Rc<u64>> = Stage::new(
            Config::default(),
            None,
            Some(output_sender),
            stats_sender,
            create_pipeline_cancellation_token(),
        );

        assert_eq!(
            stage.send(std::rc::Rc::new(9)).await.unwrap(),
            SendResult::Success
        );
        assert_eq!(*output_receiver.recv().await.unwrap(), 9);

        output_receiver.close();
        assert_eq!(
            stage.send(std::rc::Rc::new(10)).await.unwrap(),
            SendResult::Closed
        );
    }

    #[tokio::test]
    async fn send_without_sender_is_an_error() {
        let (stats_sender, _stats_receiver) = async_channel::unbounded();
        let stage: Stage<u64, u64> = Stage::new(
            Config::default(),
            None,
            None,
            stats_sender,
            create_pipeline_cancellation_token(),
        );

        assert!(stage.send(1).await.is_err());
        assert!(stage.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_returns_none_when_cancelled() {
        let (stage, input, _output, _stats) = stage_with_channels();
        input.send(1).await.unwrap();
        stage.cancellation_token.cancel();

        assert!(stage.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_returns_none_when_upstream_closes() {
        let (stage, input, _output, _stats) = stage_with_channels();
        input.send(3).await.unwrap();
        drop(input);

        assert_eq!(stage.recv().await, Some(3));
        assert_eq!(stage.recv().await, None);
    }

    #[tokio::test]
    async fn stats_are_delivered() {
        let (stage, _input, _output, stats) = stage_with_channels();
        stage.send_stats(BatchStatistics::BatchSkip { number: 2 }).await;

        assert_eq!(
            stats.recv().await.unwrap(),
            BatchStatistics::BatchSkip { number: 2 }
        );
    }
}
