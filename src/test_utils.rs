//! Shared test utilities for the s3-bulk-delete library crate.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::Config;
use crate::deleter::Deleter;
use crate::types::StoragePath;
use crate::types::error::{DeleteError, ItemError};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a [`Config`] suitable for most unit tests.
///
/// Key defaults: `worker_size=4`, `batch_size=10`, 100 objects/sec (so a
/// 100ms base interval), bucket=`"test-bucket"`, prefix=`"prefix/"`.
pub(crate) fn make_test_config() -> Config {
    Config {
        target: StoragePath::S3 {
            bucket: "test-bucket".to_string(),
            prefix: "prefix/".to_string(),
        },
        show_no_progress: true,
        worker_size: 4,
        batch_size: 10,
        rate_limit_objects: 100,
        max_interval_milliseconds: 1600,
        restore_delay_milliseconds: 500,
        quiet_period_milliseconds: 200,
        identifier_queue_size: 100,
        ..Config::default()
    }
}

pub(crate) fn make_item_error(key: &str, code: &str, message: &str) -> ItemError {
    ItemError {
        key: key.to_string(),
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// One recorded call to [`MockDeleter::delete`].
#[derive(Debug, Clone)]
pub(crate) struct DeleteCall {
    pub keys: Vec<String>,
    pub at: Instant,
}

type Responder = Box<dyn Fn(&[String], usize) -> Result<(), DeleteError> + Send + Sync>;

/// A [`Deleter`] that records every call and answers through a closure.
///
/// The closure receives the keys and the zero-based index of the call across
/// all callers.
#[derive(Clone)]
pub(crate) struct MockDeleter {
    calls: Arc<Mutex<Vec<DeleteCall>>>,
    responder: Arc<Responder>,
}

impl MockDeleter {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[String], usize) -> Result<(), DeleteError> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Box::new(responder)),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(()))
    }

    pub fn calls(&self) -> Vec<DeleteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Deleter for MockDeleter {
    async fn delete(&self, keys: &[String]) -> Result<(), DeleteError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(DeleteCall {
                keys: keys.to_vec(),
                at: Instant::now(),
            });
            calls.len() - 1
        };
        (self.responder)(keys, index)
    }
}
