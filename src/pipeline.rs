//! Bulk delete pipeline orchestrator.
//!
//! Creates and connects all pipeline stages:
//! Read → Batch → Delete → Track.
//!
//! Stages run as independent tasks connected by bounded async channels, so a
//! slow stage applies backpressure to the one before it. Delete workers share
//! the batch queue using the MPMC (multi-producer, multi-consumer) pattern and
//! share one rate limiter and one concurrency limiter.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::io::AsyncBufRead;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::batcher::{Batcher, BatcherReport};
use crate::config::Config;
use crate::deleter::{BatchDeleter, DeleteWorker, Deleter};
use crate::limiter::{ConcurrencyLimiter, IntervalRateLimiter};
use crate::reader::IdentifierReader;
use crate::resume::{CompletionLog, load_skip_file};
use crate::stage::Stage;
use crate::storage;
use crate::tracker::{CompletionRecord, CompletionTracker};
use crate::types::error::{S3BulkDeleteError, exit_code_from_error};
use crate::types::token::PipelineCancellationToken;
use crate::types::{Batch, BatchStatistics};

/// End-of-run figures.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub completed_batches: u64,
    /// `completed_batches * batch_size`. The last batch may have been smaller.
    pub completed_objects: u64,
    pub skipped_batches: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn objects_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.completed_objects as f64 / secs
    }
}

/// The bulk delete pipeline.
///
/// ## Pipeline stages
///
/// ```text
/// IdentifierReader → Batcher → DeleteWorkers (MPMC) → CompletionTracker
/// ```
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3_bulk_delete::{BulkDeletePipeline, Config, create_pipeline_cancellation_token};
///
/// let config = Config::for_target("my-bucket", "logs/");
/// let cancellation_token = create_pipeline_cancellation_token();
/// let mut pipeline = BulkDeletePipeline::for_s3(config, cancellation_token).await?;
/// pipeline.close_stats_sender();
///
/// let input = tokio::io::BufReader::new(tokio::io::stdin());
/// pipeline.run(input).await;
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// std::process::exit(pipeline.exit_code());
/// # }
/// ```
pub struct BulkDeletePipeline {
    config: Config,
    deleter: Arc<dyn Deleter>,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<BatchStatistics>,
    stats_receiver: Receiver<BatchStatistics>,
    rate_limiter: Arc<IntervalRateLimiter>,
    concurrency_limiter: ConcurrencyLimiter,
    has_error: Arc<AtomicBool>,
    has_panic: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    summary: Option<RunSummary>,
    ready: bool,
}

impl BulkDeletePipeline {
    /// Create a pipeline around any [`Deleter`].
    ///
    /// # Panics
    ///
    /// Panics if the effective worker size is zero.
    pub fn new(
        config: Config,
        deleter: Arc<dyn Deleter>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        let rate_limiter = Arc::new(IntervalRateLimiter::new(
            config.base_interval(),
            config.max_interval(),
        ));
        let concurrency_limiter = ConcurrencyLimiter::new(
            config.effective_worker_size() as usize,
            config.restore_delay(),
        );

        Self {
            config,
            deleter,
            cancellation_token,
            stats_sender,
            stats_receiver,
            rate_limiter,
            concurrency_limiter,
            has_error: Arc::new(AtomicBool::new(false)),
            has_panic: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            summary: None,
            ready: true,
        }
    }

    /// Create a pipeline deleting from the S3 target in `config`.
    pub async fn for_s3(
        config: Config,
        cancellation_token: PipelineCancellationToken,
    ) -> Result<Self> {
        let target = storage::create_storage(&config).await?;
        let deleter = Arc::new(BatchDeleter::new(target));
        Ok(Self::new(config, deleter, cancellation_token))
    }

    /// Run the pipeline over line-delimited identifiers read from `input`.
    ///
    /// Errors are recorded rather than returned; check [`has_error`](Self::has_error)
    /// and [`exit_code`](Self::exit_code) afterwards.
    pub async fn run<R>(&mut self, input: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        assert!(self.ready, "BulkDeletePipeline::run() called more than once");
        self.ready = false;

        let started = Instant::now();

        match self.prepare_resume().await {
            Ok((skip, completion_log)) => {
                self.execute_pipeline(input, skip, completion_log, started)
                    .await
            }
            Err(e) => {
                error!(error = format!("{e:#}"), "failed to prepare resume files.");
                self.record_error(e);
            }
        }

        self.shutdown();
    }

    /// Check if any error occurred during the pipeline execution.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Check if any spawned task panicked during the pipeline execution.
    pub fn has_panic(&self) -> bool {
        self.has_panic.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        Some(error_list.drain(..).collect())
    }

    /// Get error messages without consuming them.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| e.to_string()).collect())
    }

    /// Get the stats receiver for progress reporting.
    pub fn get_stats_receiver(&self) -> Receiver<BatchStatistics> {
        self.stats_receiver.clone()
    }

    /// Close the stats sender to signal the progress reporter to finish.
    ///
    /// Call this before `run()` if you don't need progress reporting.
    pub fn close_stats_sender(&self) {
        self.stats_sender.close();
    }

    /// Summary of the finished run. `None` before `run()` or when the run
    /// never started its stages.
    pub fn get_summary(&self) -> Option<RunSummary> {
        self.summary.clone()
    }

    /// Process exit code for the run: 0 without errors, otherwise the code
    /// of the first recorded error.
    pub fn exit_code(&self) -> i32 {
        if !self.has_error() {
            return 0;
        }
        self.errors
            .lock()
            .unwrap()
            .front()
            .map(exit_code_from_error)
            .unwrap_or(1)
    }

    // -----------------------------------------------------------------------
    // Internal methods
    // -----------------------------------------------------------------------

    async fn prepare_resume(&self) -> Result<(HashSet<u64>, Option<CompletionLog>)> {
        let skip = match self.config.skip_file.as_ref() {
            Some(path) => load_skip_file(path).await?,
            None => HashSet::new(),
        };

        let completion_log = match self.config.completion_log.as_ref() {
            Some(path) => Some(CompletionLog::open(path).await?),
            None => None,
        };

        Ok((skip, completion_log))
    }

    async fn execute_pipeline<R>(
        &mut self,
        input: R,
        skip: HashSet<u64>,
        completion_log: Option<CompletionLog>,
        started: Instant,
    ) where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        // Stage 1: Read identifiers
        let identifiers = self.read_identifiers(input);

        // Stage 2: Group them into batches
        let (batches, batcher_handle) = self.batch_identifiers(identifiers, skip);

        // Stage 3: Spawn delete workers
        let completions = self.delete_batches(batches);

        // Stage 4: Track completions until every worker has finished
        let record = self.track_completions(completions, completion_log).await;

        let report = batcher_handle.await.ok().flatten().unwrap_or_default();

        if !self.cancellation_token.is_cancelled() {
            debug!("waiting for the concurrency limiter to settle.");
            self.concurrency_limiter
                .wait_done(self.config.quiet_period())
                .await;
        }

        let completed_batches = record.len() as u64;
        let summary = RunSummary {
            completed_batches,
            completed_objects: completed_batches * self.config.batch_size as u64,
            skipped_batches: report.skipped,
            elapsed: started.elapsed(),
        };
        info!(
            completed_batches = summary.completed_batches,
            completed_objects = summary.completed_objects,
            skipped_batches = summary.skipped_batches,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            objects_per_sec = summary.objects_per_sec(),
            "bulk delete has finished."
        );
        self.summary = Some(summary);
    }

    /// Record an error and set the error flag.
    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    fn shutdown(&self) {
        self.close_stats_sender();
    }

    fn create_stage<In, Out>(
        &self,
        receiver: Option<Receiver<In>>,
        sender: Option<Sender<Out>>,
    ) -> Stage<In, Out> {
        Stage::new(
            self.config.clone(),
            receiver,
            sender,
            self.stats_sender.clone(),
            self.cancellation_token.clone(),
        )
    }

    /// Spawn a stage task with error handling.
    ///
    /// The stage runs in an inner task so that a panic is caught by the outer
    /// one. Any failure cancels the whole run.
    fn spawn_stage<T, F>(&self, stage_name: String, stage: F) -> JoinHandle<Option<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let has_error = self.has_error.clone();
        let has_panic = self.has_panic.clone();
        let error_list = self.errors.clone();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let join_result = tokio::spawn(stage).await;

            match join_result {
                Ok(Ok(value)) => {
                    debug!("{stage_name} completed successfully.");
                    Some(value)
                }
                Ok(Err(e)) => {
                    cancellation_token.cancel();
                    has_error.store(true, Ordering::SeqCst);
                    error!("{stage_name} failed: {e:#}");
                    error_list.lock().unwrap().push_back(e);
                    None
                }
                Err(e) => {
                    cancellation_token.cancel();
                    has_error.store(true, Ordering::SeqCst);
                    has_panic.store(true, Ordering::SeqCst);
                    error!("{stage_name} task panicked: {e}");
                    error_list.lock().unwrap().push_back(
                        S3BulkDeleteError::Pipeline(format!("{stage_name} task panicked: {e}"))
                            .into(),
                    );
                    None
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Pipeline stages
    // -----------------------------------------------------------------------

    /// Stage 1: Spawn the IdentifierReader.
    fn read_identifiers<R>(&self, input: R) -> Receiver<String>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (sender, receiver) =
            async_channel::bounded::<String>(self.config.identifier_queue_size.max(1) as usize);
        let reader = IdentifierReader::new(self.create_stage(None, Some(sender)));

        self.spawn_stage("identifier reader".to_string(), async move {
            reader.read(input).await
        });

        receiver
    }

    /// Stage 2: Spawn the Batcher.
    fn batch_identifiers(
        &self,
        identifiers: Receiver<String>,
        skip: HashSet<u64>,
    ) -> (Receiver<Batch>, JoinHandle<Option<BatcherReport>>) {
        let (sender, receiver) =
            async_channel::bounded::<Batch>(self.config.effective_worker_size().max(1) as usize);
        let batcher = Batcher::new(self.create_stage(Some(identifiers), Some(sender)), skip);

        let handle = self.spawn_stage("batcher".to_string(), async move { batcher.run().await });

        (receiver, handle)
    }

    /// Stage 3: Spawn DeleteWorkers using the MPMC pattern.
    fn delete_batches(&self, batches: Receiver<Batch>) -> Receiver<u64> {
        let worker_size = self.config.effective_worker_size();
        let (sender, receiver) = async_channel::bounded::<u64>(worker_size.max(1) as usize);

        for worker_index in 0..worker_size {
            let worker = DeleteWorker::new(
                worker_index,
                self.create_stage(Some(batches.clone()), Some(sender.clone())),
                self.deleter.clone(),
                self.rate_limiter.clone(),
                self.concurrency_limiter.clone(),
            );

            self.spawn_stage(format!("delete worker {worker_index}"), async move {
                worker.run().await
            });
        }

        // Drop the original sender so the completion queue closes when all
        // workers finish.
        drop(sender);

        receiver
    }

    /// Stage 4: Run the CompletionTracker and wait for it.
    async fn track_completions(
        &self,
        completions: Receiver<u64>,
        completion_log: Option<CompletionLog>,
    ) -> CompletionRecord {
        let tracker = CompletionTracker::new(completions, completion_log);
        let handle = self.spawn_stage("completion tracker".to_string(), tracker.track());

        match handle.await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                self.has_panic.store(true, Ordering::SeqCst);
                error!("completion tracker task panicked: {e}");
                self.record_error(
                    S3BulkDeleteError::Pipeline(format!("completion tracker task panicked: {e}"))
                        .into(),
                );
                CompletionRecord::default()
            }
        }
    }
}
