pub mod args;

use std::path::PathBuf;
use std::time::Duration;

use crate::limiter::IntervalRateLimiter;
use crate::types::{ClientConfigLocation, S3Credentials, StoragePath};
use aws_sdk_s3::types::RequestPayer;

/// Main configuration for the s3-bulk-delete pipeline.
///
/// Holds all settings needed to configure and run a
/// [`BulkDeletePipeline`](crate::BulkDeletePipeline): target bucket/prefix,
/// AWS client settings, batch size, rate and concurrency limits, and the
/// resume files.
///
/// # Quick Start
///
/// ```
/// use s3_bulk_delete::Config;
///
/// let config = Config::for_target("my-bucket", "logs/2024/");
/// assert_eq!(config.worker_size, 16);
/// assert_eq!(config.batch_size, 500);
/// ```
///
/// Then customize fields as needed:
///
/// ```
/// use s3_bulk_delete::Config;
///
/// let mut config = Config::for_target("my-bucket", "logs/2024/");
/// config.batch_size = 1000;
/// config.rate_limit_objects = 1000;
/// config.serial = true;
/// assert_eq!(config.effective_worker_size(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target: StoragePath,
    pub show_no_progress: bool,
    pub target_client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub worker_size: u16,
    pub serial: bool,
    pub batch_size: u16,
    pub rate_limit_objects: u32,
    pub max_interval_milliseconds: u64,
    pub restore_delay_milliseconds: u64,
    pub quiet_period_milliseconds: u64,
    pub identifier_queue_size: u32,
    pub skip_file: Option<PathBuf>,
    pub completion_log: Option<PathBuf>,
    pub mfa: Option<String>,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with the CLI defaults for the given S3 bucket and prefix.
    pub fn for_target(bucket: &str, prefix: &str) -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            },
            ..Config::default()
        }
    }

    /// Number of delete workers. Serial mode runs exactly one.
    pub fn effective_worker_size(&self) -> u16 {
        if self.serial { 1 } else { self.worker_size }
    }

    /// Request spacing derived from the objects-per-second ceiling.
    pub fn base_interval(&self) -> Duration {
        IntervalRateLimiter::base_interval_for(self.batch_size, self.rate_limit_objects)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_milliseconds)
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_milliseconds)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_milliseconds)
    }
}

impl Default for Config {
    /// The `target` defaults to an empty bucket/prefix. Set it before running
    /// a pipeline.
    fn default() -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            show_no_progress: false,
            target_client_config: None,
            tracing_config: None,
            worker_size: 16,
            serial: false,
            batch_size: 500,
            rate_limit_objects: 3500,
            max_interval_milliseconds: 30_000,
            restore_delay_milliseconds: 5000,
            quiet_period_milliseconds: 2000,
            identifier_queue_size: 16 * 1000,
            skip_file: None,
            completion_log: None,
            mfa: None,
            auto_complete_shell: None,
        }
    }
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub request_payer: Option<RequestPayer>,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
}

/// Retry configuration for AWS SDK operations.
///
/// These retries happen inside a single delete attempt. The pipeline's own
/// retry loop only sees the outcome after the SDK gives up.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
