use crate::config::{CLITimeoutConfig, ClientConfig, Config, RetryConfig, TracingConfig};
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials, StoragePath};
use aws_sdk_s3::types::RequestPayer;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;

pub mod value_parser;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_WORKER_SIZE: u16 = 16;
const DEFAULT_BATCH_SIZE: u16 = 500;
const DEFAULT_RATE_LIMIT_OBJECTS: u32 = 3500;
const DEFAULT_MAX_INTERVAL_MILLISECONDS: u64 = 30_000;
const DEFAULT_RESTORE_DELAY_MILLISECONDS: u64 = 5000;
const DEFAULT_QUIET_PERIOD_MILLISECONDS: u64 = 2000;
const IDENTIFIER_QUEUE_SIZE_PER_WORKER: u32 = 1000;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_REQUEST_PAYER: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_SERIAL: bool = false;

const MAX_BATCH_SIZE: u16 = 1000;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_INVALID_TARGET: &str =
    "Target must be an S3 path starting with 's3://' (e.g., s3://bucket/prefix).";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE: &str = "Batch size must be at most 1000 (S3 API limit).";
const ERROR_MESSAGE_RATE_LIMIT_ZERO: &str = "Rate limit must be at least 1 object per second.";
const ERROR_MESSAGE_IDENTIFIER_QUEUE_SIZE_ZERO: &str = "Identifier queue size must be at least 1.";
const ERROR_MESSAGE_SECRET_KEY_REQUIRED: &str =
    "--target-secret-key is required when --target-access-key is set.";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_s3_target(s: &str) -> Result<String, String> {
    if s.starts_with("s3://") && s.len() > 5 {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_INVALID_TARGET.to_string())
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3-bulk-delete - Delete S3 objects listed on stdin, as fast as S3 allows.
///
/// Keys are read one per line, grouped into batches and deleted with
/// DeleteObjects. The request rate and concurrency back off automatically
/// when S3 starts throttling.
///
/// Example:
///   s3-bulk-delete s3://my-bucket < keys.txt
///   s3-bulk-delete s3://my-bucket/logs/ --rate-limit-objects 1000 < keys.txt
///   s3-bulk-delete s3://my-bucket --completion-log done.txt --skip-file done.txt < keys.txt
#[derive(Parser, Clone, Debug)]
#[command(name = "s3-bulk-delete", version, about, long_about = None)]
pub struct CLIArgs {
    /// S3 target path: s3://<BUCKET_NAME>[/prefix]
    #[arg(
        env,
        help = "s3://<BUCKET_NAME>[/prefix]",
        value_parser = check_s3_target,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "s3://ignored"),
        required = false,
    )]
    pub target: String,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Number of keys per DeleteObjects request (1-1000). Default: 500.
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "General")]
    pub batch_size: u16,

    /// Delete one batch at a time (forces --worker-size 1).
    #[arg(long, env, default_value_t = DEFAULT_SERIAL, help_heading = "General")]
    pub serial: bool,

    /// Don't show the progress bar.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    /// MFA device serial number and current code, separated by a space.
    #[arg(
        long,
        env,
        value_parser = NonEmptyStringValueParser::new(),
        help_heading = "General",
        long_help = r#"The concatenation of the authentication device's serial number,
a space, and the value displayed on the device.
Required to permanently delete a versioned object if MFA delete is enabled.

Example: "arn:aws:iam::123456789012:mfa/user 123456""#
    )]
    pub mfa: Option<String>,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Maximum objects deleted per second. Default: 3500.
    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT_OBJECTS, help_heading = "Performance")]
    pub rate_limit_objects: u32,

    /// Upper bound of the request interval while backing off. Default: 30000.
    #[arg(long, env, default_value_t = DEFAULT_MAX_INTERVAL_MILLISECONDS, help_heading = "Performance")]
    pub max_interval_milliseconds: u64,

    /// Number of concurrent delete workers. Default: 16.
    #[arg(long, env, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Cool-down before a failed concurrency permit is reused. Default: 5000.
    #[arg(long, env, default_value_t = DEFAULT_RESTORE_DELAY_MILLISECONDS, help_heading = "Performance")]
    pub restore_delay_milliseconds: u64,

    /// How long the limiter must stay idle before the run ends. Default: 2000.
    #[arg(long, env, default_value_t = DEFAULT_QUIET_PERIOD_MILLISECONDS, help_heading = "Performance")]
    pub quiet_period_milliseconds: u64,

    /// Keys buffered ahead of the batcher. Default: 1000 * worker size.
    #[arg(long, env, help_heading = "Performance")]
    pub identifier_queue_size: Option<u32>,

    // -----------------------------------------------------------------------
    // Resume options
    // -----------------------------------------------------------------------
    /// File of batch numbers to skip, one per line.
    #[arg(
        long,
        env,
        value_parser = value_parser::file_exist::is_file_exist,
        help_heading = "Resume",
        long_help = r#"File of batch numbers to skip, one per line.
Pass the --completion-log of an interrupted run to resume it.
The input must be the same keys in the same order with the same --batch-size."#
    )]
    pub skip_file: Option<PathBuf>,

    /// Append the number of every completed batch to this file.
    #[arg(long, env, help_heading = "Resume")]
    pub completion_log: Option<PathBuf>,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q hides per-batch notices, -v/-vv/-vvv add debug output.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum attempts the AWS SDK makes for one request. Default: 10.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial SDK backoff in milliseconds. Default: 100.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile for the target. If not set, uses the default profile.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), conflicts_with = "target_access_key", help_heading = "AWS")]
    pub target_profile: Option<String>,

    /// AWS access key ID for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_access_key: Option<String>,

    /// AWS secret access key for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_secret_key: Option<String>,

    /// AWS session token for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_session_token: Option<String>,

    /// AWS region for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO, Wasabi).
    #[arg(long, env, value_parser = value_parser::url::check_scheme, help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,

    /// Enable requester-pays for the target bucket.
    #[arg(long, env, default_value_t = DEFAULT_REQUEST_PAYER, help_heading = "AWS")]
    pub target_request_payer: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3_bulk_delete::config::args::parse_from_args;
///
/// let args = vec!["s3-bulk-delete", "s3://my-bucket/prefix/", "--serial"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.serial);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if self.batch_size == 0 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE.to_string());
        }
        if self.rate_limit_objects == 0 {
            return Err(ERROR_MESSAGE_RATE_LIMIT_ZERO.to_string());
        }
        if self.identifier_queue_size == Some(0) {
            return Err(ERROR_MESSAGE_IDENTIFIER_QUEUE_SIZE_ZERO.to_string());
        }
        if self.target_access_key.is_some() && self.target_secret_key.is_none() {
            return Err(ERROR_MESSAGE_SECRET_KEY_REQUIRED.to_string());
        }
        Ok(())
    }

    fn effective_worker_size(&self) -> u16 {
        if self.serial { 1 } else { self.worker_size }
    }

    fn build_identifier_queue_size(&self) -> u32 {
        self.identifier_queue_size.unwrap_or_else(|| {
            IDENTIFIER_QUEUE_SIZE_PER_WORKER.saturating_mul(self.effective_worker_size() as u32)
        })
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.target_secret_key.clone().unwrap_or_default(),
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        let request_payer = if self.target_request_payer {
            Some(RequestPayer::Requester)
        } else {
            None
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            request_payer,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn parse_target(&self) -> Result<StoragePath, String> {
        let Some(without_scheme) = self.target.strip_prefix("s3://") else {
            return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
        };

        let (bucket, prefix) = match without_scheme.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
            None => (without_scheme.to_string(), String::new()),
        };

        if bucket.is_empty() {
            return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
        }

        Ok(StoragePath::S3 { bucket, prefix })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let target = args.parse_target()?;
        let identifier_queue_size = args.build_identifier_queue_size();
        let target_client_config = Some(args.build_client_config());
        let tracing_config = args.build_tracing_config();

        Ok(Config {
            target,
            show_no_progress: args.show_no_progress,
            target_client_config,
            tracing_config,
            worker_size: args.worker_size,
            serial: args.serial,
            batch_size: args.batch_size,
            rate_limit_objects: args.rate_limit_objects,
            max_interval_milliseconds: args.max_interval_milliseconds,
            restore_delay_milliseconds: args.restore_delay_milliseconds,
            quiet_period_milliseconds: args.quiet_period_milliseconds,
            identifier_queue_size,
            skip_file: args.skip_file,
            completion_log: args.completion_log,
            mfa: args.mfa,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
