pub mod client_builder;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, RequestPayer};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::storage::{Storage, StorageTrait};
use crate::types::StoragePath;
use crate::types::error::S3BulkDeleteError;

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "SlowDown") and the message from the response.
/// For other error types (network, timeout, construction failure), returns
/// "N/A" as the code and the full error description as the message.
pub(crate) fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// S3 storage for the bulk delete pipeline.
#[derive(Clone)]
pub struct S3Storage {
    bucket: String,
    prefix: String,
    client: Arc<Client>,
    request_payer: Option<RequestPayer>,
    mfa: Option<String>,
}

impl S3Storage {
    /// Build the storage for `config.target`.
    ///
    /// Without `target_client_config` the client comes from the default AWS
    /// provider chain.
    pub async fn create(config: &Config) -> Result<Storage> {
        let StoragePath::S3 { bucket, prefix } = config.target.clone();
        if bucket.is_empty() {
            return Err(anyhow!(S3BulkDeleteError::InvalidConfig(
                "target bucket must not be empty".to_string()
            )));
        }

        let (client, request_payer) = match config.target_client_config.as_ref() {
            Some(client_config) => (
                client_config.create_client().await,
                client_config.request_payer.clone(),
            ),
            None => (client_builder::create_default_client().await, None),
        };

        Ok(Box::new(S3Storage::new(
            bucket,
            prefix,
            client,
            request_payer,
            config.mfa.clone(),
        )))
    }

    fn new(
        bucket: String,
        prefix: String,
        client: Client,
        request_payer: Option<RequestPayer>,
        mfa: Option<String>,
    ) -> Self {
        Self {
            bucket,
            prefix,
            client: Arc::new(client),
            request_payer,
            mfa,
        }
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn delete_objects(&self, objects: Vec<ObjectIdentifier>) -> Result<DeleteObjectsOutput> {
        let object_count = objects.len();

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("Failed to build Delete request")?;

        self.client
            .delete_objects()
            .set_request_payer(self.request_payer.clone())
            .set_mfa(self.mfa.clone())
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                warn!(
                    bucket = self.bucket,
                    prefix = self.prefix,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} objects in s3://{}/{}: {} ({}).",
                    object_count,
                    self.bucket,
                    self.prefix,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow!("{s3_error_code}: {s3_error_message}")
                    .context("aws_sdk_s3::client::delete_objects() failed.")
            })
    }
}

/// Prepend the storage prefix to an identifier to form the full S3 key.
///
/// If the prefix is empty, returns the identifier as-is.
pub(crate) fn prepend_prefix(prefix: &str, relative_key: &str) -> String {
    if prefix.is_empty() {
        relative_key.to_string()
    } else {
        format!("{prefix}{relative_key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CLITimeoutConfig, ClientConfig, RetryConfig};
    use crate::test_utils::{init_dummy_tracing_subscriber, make_test_config};
    use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};

    fn make_client_config(request_payer: Option<RequestPayer>) -> ClientConfig {
        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: None,
                aws_shared_credentials_file: None,
            },
            credential: S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: "test".to_string(),
                    secret_access_key: "test".to_string(),
                    session_token: None,
                },
            },
            region: Some("us-east-1".to_string()),
            endpoint_url: Some("https://localhost:9000".to_string()),
            force_path_style: true,
            request_payer,
            retry_config: RetryConfig {
                aws_max_attempts: 3,
                initial_backoff_milliseconds: 100,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: None,
                operation_attempt_timeout_milliseconds: None,
                connect_timeout_milliseconds: None,
                read_timeout_milliseconds: None,
            },
        }
    }

    #[test]
    fn prepend_prefix_with_prefix() {
        init_dummy_tracing_subscriber();

        assert_eq!(prepend_prefix("logs/", "file.txt"), "logs/file.txt");
        assert_eq!(prepend_prefix("a/b/c/", "key.json"), "a/b/c/key.json");
    }

    #[test]
    fn prepend_prefix_empty_prefix() {
        assert_eq!(prepend_prefix("", "file.txt"), "file.txt");
        assert_eq!(prepend_prefix("", "a/b/c"), "a/b/c");
    }

    #[tokio::test]
    async fn create_storage_uses_target_bucket_and_prefix() {
        init_dummy_tracing_subscriber();

        let mut config = make_test_config();
        config.target_client_config = Some(make_client_config(Some(RequestPayer::Requester)));
        config.mfa = Some("arn:aws:iam::123456789012:mfa/user 123456".to_string());

        let storage = S3Storage::create(&config).await.unwrap();
        assert_eq!(storage.bucket(), "test-bucket");
        assert_eq!(storage.prefix(), "prefix/");

        let cloned = dyn_clone::clone_box(&*storage);
        assert_eq!(cloned.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn create_storage_rejects_empty_bucket() {
        init_dummy_tracing_subscriber();

        let mut config = make_test_config();
        config.target = StoragePath::S3 {
            bucket: String::new(),
            prefix: String::new(),
        };
        config.target_client_config = Some(make_client_config(None));

        let err = S3Storage::create(&config).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<S3BulkDeleteError>(),
            Some(S3BulkDeleteError::InvalidConfig(_))
        ));
    }
}
