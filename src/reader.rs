use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::stage::{SendResult, Stage};
use crate::types::error::S3BulkDeleteError;

/// Entry stage of the pipeline: turns line-delimited input into identifiers.
///
/// Blank lines are dropped. Everything else, including surrounding
/// whitespace, is forwarded as-is since S3 keys may legitimately contain it.
pub struct IdentifierReader {
    stage: Stage<(), String>,
}

impl IdentifierReader {
    pub fn new(stage: Stage<(), String>) -> Self {
        Self { stage }
    }

    /// Read `input` to the end and send each identifier downstream.
    ///
    /// Returns the number of identifiers sent. Closes the identifier queue when
    /// done so the batcher sees end of input.
    pub async fn read<R>(&self, input: R) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        debug!("identifier reader has started.");

        let mut lines = input.lines();
        let mut count = 0u64;

        loop {
            let line = tokio::select! {
                biased;
                _ = self.stage.cancellation_token.cancelled() => {
                    debug!("identifier reader has been cancelled.");
                    return Ok(count);
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.stage.close_sender();
                    return Err(anyhow!(S3BulkDeleteError::Io(format!(
                        "failed to read input after {count} identifiers: {e}"
                    ))));
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            if self.stage.send(line).await? == SendResult::Closed {
                debug!("identifier queue has been closed.");
                return Ok(count);
            }
            count += 1;
        }

        self.stage.close_sender();
        debug!(identifiers = count, "identifier reader has been completed.");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::init_dummy_tracing_subscriber;
    use crate::types::error::exit_code_from_error;
    use crate::types::token::create_pipeline_cancellation_token;
    use async_channel::Receiver;

    fn create_reader(capacity: usize) -> (IdentifierReader, Receiver<String>) {
        let (sender, receiver) = async_channel::bounded(capacity);
        let (stats_sender, _stats_receiver) = async_channel::unbounded();
        let stage = Stage::new(
            Config::default(),
            None,
            Some(sender),
            stats_sender,
            create_pipeline_cancellation_token(),
        );
        (IdentifierReader::new(stage), receiver)
    }

    async fn drain(receiver: Receiver<String>) -> Vec<String> {
        let mut items = Vec::new();
        while let Ok(item) = receiver.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn reads_one_identifier_per_line() {
        init_dummy_tracing_subscriber();

        let (reader, receiver) = create_reader(16);
        let input: &[u8] = b"a/1.txt\nb/2.txt\r\nc/3.txt";

        let count = reader.read(input).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(drain(receiver).await, vec!["a/1.txt", "b/2.txt", "c/3.txt"]);
    }

    #[tokio::test]
    async fn drops_blank_lines_and_keeps_inner_spaces() {
        init_dummy_tracing_subscriber();

        let (reader, receiver) = create_reader(16);
        let input: &[u8] = b"\nkey with spaces\n   \n\nlast\n";

        assert_eq!(reader.read(input).await.unwrap(), 2);
        assert_eq!(drain(receiver).await, vec!["key with spaces", "last"]);
    }

    #[tokio::test]
    async fn empty_input_closes_queue() {
        let (reader, receiver) = create_reader(1);
        let input: &[u8] = b"";

        assert_eq!(reader.read(input).await.unwrap(), 0);
        assert!(receiver.is_closed());
        assert!(drain(receiver).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_io_error() {
        init_dummy_tracing_subscriber();

        let (reader, receiver) = create_reader(16);
        let input: &[u8] = b"good\n\xff\xfe\nnever\n";

        let err = reader.read(input).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<S3BulkDeleteError>(),
            Some(S3BulkDeleteError::Io(_))
        ));
        assert_eq!(exit_code_from_error(&err), 1);
        assert_eq!(drain(receiver).await, vec!["good"]);
    }

    #[tokio::test]
    async fn stops_when_queue_is_closed() {
        let (reader, receiver) = create_reader(1);
        receiver.close();
        let input: &[u8] = b"a\nb\n";

        assert_eq!(reader.read(input).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let (reader, _receiver) = create_reader(1);
        reader.stage.cancellation_token.cancel();
        let input: &[u8] = b"a\nb\nc\n";

        assert_eq!(reader.read(input).await.unwrap(), 0);
    }
}
