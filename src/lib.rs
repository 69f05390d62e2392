/*!
# Overview
s3-bulk-delete deletes large sets of S3 objects whose keys are read from
stdin, as fast as the bucket will take it and no faster.

Keys are grouped into numbered batches and deleted with the S3
`DeleteObjects` API by a pool of workers. Two adaptive limiters sit in front
of every request:

- an interval rate limiter that spaces request starts and doubles the spacing
  while requests keep failing,
- a concurrency limiter that takes permits out of service while they fail and
  restores them once requests succeed again.

Transient failures (throttling, internal errors, network problems) are retried
forever. A non-retryable rejection such as `AccessDenied` aborts the run.
Completed batch numbers can be appended to a completion log, and that log can
be passed back as the skip file of the next run to resume where it stopped.

## As a Library
The s3-bulk-delete CLI is a thin wrapper over this library.

```toml
[dependencies]
s3-bulk-delete = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3_bulk_delete::config::args::parse_from_args;
use s3_bulk_delete::{BulkDeletePipeline, Config, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec![
        "s3-bulk-delete",
        "s3://my-bucket/prefix/",
        "--completion-log",
        "completed.txt",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = BulkDeletePipeline::for_s3(config, cancellation_token)
        .await
        .unwrap();
    pipeline.close_stats_sender();

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    pipeline.run(input).await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod batcher;
pub mod config;
pub mod deleter;
pub mod limiter;
pub mod pipeline;
pub mod reader;
pub mod resume;
pub mod stage;
pub mod storage;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::CLIArgs;
pub use deleter::Deleter;
pub use pipeline::{BulkDeletePipeline, RunSummary};
pub use types::error::{S3BulkDeleteError, exit_code_from_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
