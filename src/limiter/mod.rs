//! Admission control for delete requests.
//!
//! Every attempt first waits on the [`IntervalRateLimiter`] for its start slot
//! and then on the [`ConcurrencyLimiter`] for a permit. Both are told the
//! outcome of the attempt afterwards.

pub mod concurrency;
pub mod interval;

pub use concurrency::{ConcurrencyLimiter, Permit, PoolSnapshot};
pub use interval::IntervalRateLimiter;
