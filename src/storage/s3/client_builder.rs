use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use tracing::debug;

use crate::config::{CLITimeoutConfig, ClientConfig};
use crate::types::{ClientConfigLocation, S3Credentials};

const CREDENTIALS_PROVIDER_NAME: &str = "s3-bulk-delete";

impl ClientConfig {
    /// Build an S3 client from the CLI/library client settings.
    pub async fn create_client(&self) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(self.build_retry_config())
            .timeout_config(build_timeout_config(&self.cli_timeout_config));

        if let Some(profile_files) = build_profile_files(&self.client_config_location) {
            loader = loader.profile_files(profile_files);
        }

        match &self.credential {
            S3Credentials::Profile(profile_name) => {
                loader = loader.profile_name(profile_name);
            }
            S3Credentials::Credentials { access_keys } => {
                loader = loader.credentials_provider(Credentials::new(
                    access_keys.access_key.clone(),
                    access_keys.secret_access_key.clone(),
                    access_keys.session_token.clone(),
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                ));
            }
            S3Credentials::FromEnvironment => {}
        }

        if let Some(region) = self.region.clone() {
            loader = loader.region(Region::new(region));
        }

        if let Some(endpoint_url) = self.endpoint_url.as_ref() {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        debug!(
            region = ?sdk_config.region(),
            endpoint_url = self.endpoint_url,
            force_path_style = self.force_path_style,
            "s3 client config has been loaded."
        );

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .build();

        Client::from_conf(s3_config)
    }

    fn build_retry_config(&self) -> RetryConfig {
        RetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }
}

/// Client for a [`Config`](crate::Config) built without explicit client
/// settings: everything comes from the default AWS provider chain.
pub async fn create_default_client() -> Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    Client::new(&sdk_config)
}

fn build_timeout_config(timeout_config: &CLITimeoutConfig) -> TimeoutConfig {
    let mut builder = TimeoutConfig::builder();

    if let Some(ms) = timeout_config.operation_timeout_milliseconds {
        builder = builder.operation_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = timeout_config.operation_attempt_timeout_milliseconds {
        builder = builder.operation_attempt_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = timeout_config.connect_timeout_milliseconds {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = timeout_config.read_timeout_milliseconds {
        builder = builder.read_timeout(Duration::from_millis(ms));
    }

    builder.build()
}

/// Custom config/credentials file locations. `None` keeps the SDK defaults.
fn build_profile_files(location: &ClientConfigLocation) -> Option<EnvConfigFiles> {
    if location.aws_config_file.is_none() && location.aws_shared_credentials_file.is_none() {
        return None;
    }

    let mut builder = EnvConfigFiles::builder();
    builder = match location.aws_config_file.as_ref() {
        Some(path) => builder.with_file(EnvConfigFileKind::Config, path),
        None => builder.include_default_config_file(true),
    };
    builder = match location.aws_shared_credentials_file.as_ref() {
        Some(path) => builder.with_file(EnvConfigFileKind::Credentials, path),
        None => builder.include_default_credentials_file(true),
    };

    Some(builder.build())
}
