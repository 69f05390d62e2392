use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::ObjectIdentifier;
use dyn_clone::DynClone;

use crate::config::Config;

pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Remote object store operations used by the batch deleter.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Bucket the storage deletes from.
    fn bucket(&self) -> &str;

    /// Prefix prepended to every identifier before it is sent.
    fn prefix(&self) -> &str;

    /// Delete multiple objects in a single DeleteObjects request.
    ///
    /// Keys in `objects` are **full S3 keys**; the prefix is not prepended.
    /// The request is sent in quiet mode, so the output only lists the keys
    /// that could not be deleted.
    async fn delete_objects(&self, objects: Vec<ObjectIdentifier>) -> Result<DeleteObjectsOutput>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the S3 storage for the configured target.
pub async fn create_storage(config: &Config) -> Result<Storage> {
    s3::S3Storage::create(config).await
}
