use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// A numbered group of object keys deleted with a single request.
///
/// Numbers start at 1 and follow input order. A batch is never split or
/// merged after the batcher builds it; the worker that receives it owns it
/// until it completes or the run aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: u64,
    pub items: Vec<String>,
}

impl Batch {
    pub fn new(number: u64, items: Vec<String>) -> Self {
        Self { number, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatistics {
    BatchStart { number: u64 },
    BatchComplete { number: u64, objects: u64 },
    BatchSkip { number: u64 },
    BatchRetry { number: u64 },
    BatchError { number: u64 },
}

/// S3 storage path specification.
#[derive(Debug, Clone)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
}

/// AWS configuration file locations.
#[derive(Debug, Clone)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential sources.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair with secure zeroization.
///
/// The secret_access_key and session_token are securely cleared from memory
/// when this struct is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
