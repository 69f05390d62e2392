//! Request pacing with capped exponential backoff.
//!
//! Every delete attempt waits in [`IntervalRateLimiter::check_wait`] until the
//! current interval has passed since the previous attempt started. Failures
//! double the interval up to a ceiling, successes halve it back towards the
//! configured base.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// `scale * 2^index`, saturating at [`Duration::MAX`].
pub fn backoff_interval(scale: Duration, index: u32) -> Duration {
    2u32.checked_pow(index)
        .and_then(|multiplier| scale.checked_mul(multiplier))
        .unwrap_or(Duration::MAX)
}

/// Smallest failure count whose backoff reaches `max_interval`.
fn compute_fail_max(base_interval: Duration, max_interval: Duration) -> u32 {
    if base_interval.is_zero() {
        return 0;
    }
    let mut fail_max = 0;
    while backoff_interval(base_interval, fail_max) < max_interval {
        fail_max += 1;
    }
    fail_max
}

#[derive(Debug)]
struct IntervalState {
    interval: Duration,
    fail_count: u32,
    last_start: Option<Instant>,
}

/// Enforces a minimum spacing between attempt starts and widens it while the
/// remote service keeps failing.
#[derive(Debug)]
pub struct IntervalRateLimiter {
    base_interval: Duration,
    max_interval: Duration,
    fail_max: u32,
    state: Mutex<IntervalState>,
}

impl IntervalRateLimiter {
    /// Create a limiter starting at `base_interval`.
    ///
    /// A `max_interval` below `base_interval` is raised to `base_interval`.
    pub fn new(base_interval: Duration, max_interval: Duration) -> Self {
        let max_interval = max_interval.max(base_interval);
        let fail_max = compute_fail_max(base_interval, max_interval);

        Self {
            base_interval,
            max_interval,
            fail_max,
            state: Mutex::new(IntervalState {
                interval: base_interval,
                fail_count: 0,
                last_start: None,
            }),
        }
    }

    /// Spacing that keeps `batch_size`-object requests under `objects_per_sec`.
    pub fn base_interval_for(batch_size: u16, objects_per_sec: u32) -> Duration {
        if objects_per_sec == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(batch_size as f64 / objects_per_sec as f64)
    }

    /// Wait until the current interval has elapsed since the last permitted
    /// start, then record this start.
    ///
    /// Concurrent callers are given consecutive start slots.
    pub async fn check_wait(&self) {
        let start = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();
            let start = match state.last_start {
                Some(last_start) => (last_start + state.interval).max(now),
                None => now,
            };
            state.last_start = Some(start);
            start
        };

        tokio::time::sleep_until(start).await;
    }

    /// Feed the outcome of one attempt back into the backoff state.
    pub fn report(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        let previous = state.fail_count;

        if success {
            state.fail_count = state.fail_count.saturating_sub(1);
        } else if state.fail_count < self.fail_max {
            state.fail_count += 1;
        }

        if state.fail_count != previous {
            state.interval = self.interval_for(state.fail_count);
            debug!(
                fail_count = state.fail_count,
                interval_ms = state.interval.as_millis() as u64,
                "request interval has been adjusted."
            );
        }
    }

    /// Interval enforced after `fail_count` net failures.
    pub fn interval_for(&self, fail_count: u32) -> Duration {
        backoff_interval(self.base_interval, fail_count).min(self.max_interval)
    }

    pub fn current_interval(&self) -> Duration {
        self.state.lock().unwrap().interval
    }

    pub fn fail_count(&self) -> u32 {
        self.state.lock().unwrap().fail_count
    }

    pub fn fail_max(&self) -> u32 {
        self.fail_max
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }
}
