// Progress indicator.
//
// Reads BatchStatistics from the stats channel and keeps a one-line progress
// display up to date, using indicatif and a moving average of throughput.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use s3_bulk_delete::types::BatchStatistics;
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Totals returned by [`show_indicator`] after the stats channel closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub completed_batches: u64,
    pub completed_objects: u64,
    pub skipped_batches: u64,
    pub retried_attempts: u64,
    pub failed_batches: u64,
}

impl IndicatorSummary {
    fn apply(&mut self, stats: BatchStatistics) -> u64 {
        match stats {
            BatchStatistics::BatchStart { .. } => 0,
            BatchStatistics::BatchComplete { objects, .. } => {
                self.completed_batches += 1;
                self.completed_objects += objects;
                objects
            }
            BatchStatistics::BatchSkip { .. } => {
                self.skipped_batches += 1;
                0
            }
            BatchStatistics::BatchRetry { .. } => {
                self.retried_attempts += 1;
                0
            }
            BatchStatistics::BatchError { .. } => {
                self.failed_batches += 1;
                0
            }
        }
    }
}

/// Moving average window in seconds (samples).
const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn a background task that reads batch statistics from the channel and
/// displays progress.
///
/// The task runs until `stats_receiver` is closed and empty. Await the
/// returned handle after the pipeline finishes.
pub fn show_indicator(
    stats_receiver: Receiver<BatchStatistics>,
    show_progress: bool,
    show_result: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_deleted_objects = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut summary = IndicatorSummary::default();

        loop {
            let mut period_objects: u64 = 0;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    period_objects += summary.apply(stats);
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() && stats_receiver.is_empty() {
                    let elapsed = start_time.elapsed();
                    let elapsed_secs_f64 = elapsed.as_secs_f64();

                    let objects_per_sec = if elapsed_secs_f64 < REFRESH_INTERVAL as f64 {
                        summary.completed_objects
                    } else {
                        (summary.completed_objects as f64 / elapsed_secs_f64) as u64
                    };

                    info!(
                        message = "bulk delete summary",
                        deleted_batches = summary.completed_batches,
                        deleted_objects = summary.completed_objects,
                        deleted_objects_per_sec = objects_per_sec,
                        skipped_batches = summary.skipped_batches,
                        retried_attempts = summary.retried_attempts,
                        failed_batches = summary.failed_batches,
                        duration_sec = elapsed_secs_f64,
                    );

                    if show_result {
                        if let Ok(style) = ProgressStyle::with_template("{msg}") {
                            progress_text.set_style(style);
                        }

                        progress_text.finish_with_message(format!(
                            "deleted {:>3} batches ({} objects) | {:>3} objects/sec,  skipped {} batches,  retried {} times,  failed {} batches,  duration {}",
                            summary.completed_batches,
                            HumanCount(summary.completed_objects),
                            HumanCount(objects_per_sec),
                            summary.skipped_batches,
                            summary.retried_attempts,
                            summary.failed_batches,
                            HumanDuration(elapsed),
                        ));

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return summary;
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            ma_deleted_objects.add_sample(period_objects);

            if show_progress {
                progress_text.set_message(format!(
                    "deleted {:>3} batches ({} objects) | {:>3} objects/sec,  skipped {} batches,  retried {} times",
                    summary.completed_batches,
                    HumanCount(summary.completed_objects),
                    HumanCount(ma_deleted_objects.get_average()),
                    summary.skipped_batches,
                    summary.retried_attempts,
                ));
            }
        }
    })
}
