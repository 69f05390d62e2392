//! Batch deletion using the S3 DeleteObjects API.

use async_trait::async_trait;
use aws_sdk_s3::types::ObjectIdentifier;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::storage::s3::prepend_prefix;
use crate::types::error::{DeleteError, ItemError};

use super::Deleter;

/// Maximum objects per batch DeleteObjects API call (S3 limit).
pub const MAX_BATCH_SIZE: usize = 1000;

/// Deletes one batch with a single DeleteObjects request.
///
/// Identifiers are joined to the storage prefix. A failed request becomes
/// [`DeleteError::Transport`]; keys listed in the response errors become
/// [`DeleteError::Rejected`].
pub struct BatchDeleter {
    target: Storage,
}

impl BatchDeleter {
    pub fn new(target: Storage) -> Self {
        Self { target }
    }

    fn build_identifiers(&self, keys: &[String]) -> Result<Vec<ObjectIdentifier>, DeleteError> {
        keys.iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(prepend_prefix(self.target.prefix(), key))
                    .build()
                    .map_err(|e| DeleteError::Transport(format!("invalid object identifier: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl Deleter for BatchDeleter {
    async fn delete(&self, keys: &[String]) -> Result<(), DeleteError> {
        if keys.is_empty() {
            return Ok(());
        }
        debug_assert!(keys.len() <= MAX_BATCH_SIZE);

        let identifiers = self.build_identifiers(keys)?;
        debug!(
            bucket = self.target.bucket(),
            object_count = identifiers.len(),
            "sending DeleteObjects batch request."
        );

        let response = self
            .target
            .delete_objects(identifiers)
            .await
            .map_err(|e| DeleteError::Transport(format!("{e:#}")))?;

        let errors: Vec<ItemError> = response
            .errors()
            .iter()
            .map(|err| ItemError {
                key: err.key().unwrap_or("unknown").to_string(),
                code: err.code().unwrap_or("unknown").to_string(),
                message: err.message().unwrap_or("no message").to_string(),
            })
            .collect();

        if errors.is_empty() {
            debug!(object_count = keys.len(), "DeleteObjects batch completed.");
            return Ok(());
        }

        for err in &errors {
            warn!(
                key = err.key,
                s3_error_code = err.code,
                s3_error_message = err.message,
                "S3 DeleteObjects partial failure for key '{}': {} ({}).",
                err.key,
                err.code,
                err.message,
            );
        }
        Err(DeleteError::rejected(errors))
    }
}
