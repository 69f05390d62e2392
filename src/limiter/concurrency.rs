//! Adaptive in-flight request limit.
//!
//! A fixed set of permits moves between three pools. A permit is *available*
//! until a worker acquires it, *active* while the request runs, and *failed*
//! while it cools down after an unsuccessful request. Cooling permits reduce
//! the effective concurrency until they are restored.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

const WAIT_DONE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

type PermitId = usize;

/// Authorises one in-flight request. Must be handed back through
/// [`ConcurrencyLimiter::report`].
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    id: PermitId,
}

impl Permit {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Pool sizes at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub available: usize,
    pub active: usize,
    pub failed: usize,
    pub restoring: usize,
}

impl PoolSnapshot {
    pub fn total(&self) -> usize {
        self.available + self.active + self.failed
    }
}

/// One stay of a permit in the failed pool. `failure` is unique per failure
/// so a restoration scheduled for an earlier stay never ends a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cooling {
    permit: PermitId,
    failure: u64,
}

#[derive(Debug)]
struct Pools {
    available: Vec<PermitId>,
    active: HashSet<PermitId>,
    failed: VecDeque<Cooling>,
    failures: u64,
    last_change: Instant,
}

impl Pools {
    fn start_cooling(&mut self, permit: PermitId) -> Cooling {
        self.failures += 1;
        let cooling = Cooling {
            permit,
            failure: self.failures,
        };
        self.failed.push_back(cooling);
        cooling
    }

    fn restore(&mut self, target: Cooling) -> Option<PermitId> {
        let position = self.failed.iter().position(|entry| *entry == target)?;

        let Cooling { permit, .. } = self.failed.remove(position)?;
        self.available.push(permit);
        self.last_change = Instant::now();
        Some(permit)
    }
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    restore_delay: Duration,
    pools: Mutex<Pools>,
    permit_returned: Notify,
    restorations: TaskTracker,
}

/// Limits the number of concurrent delete requests and shrinks that limit
/// while requests keep failing.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, restore_delay: Duration) -> Self {
        assert!(capacity > 0, "concurrency capacity must be at least 1");

        Self {
            inner: Arc::new(Inner {
                capacity,
                restore_delay,
                pools: Mutex::new(Pools {
                    available: (0..capacity).rev().collect(),
                    active: HashSet::with_capacity(capacity),
                    failed: VecDeque::with_capacity(capacity),
                    failures: 0,
                    last_change: Instant::now(),
                }),
                permit_returned: Notify::new(),
                restorations: TaskTracker::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Wait for an available permit and mark it active.
    pub async fn acquire(&self) -> Permit {
        loop {
            let notified = self.inner.permit_returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut pools = self.inner.pools.lock().unwrap();
                if let Some(id) = pools.available.pop() {
                    pools.active.insert(id);
                    pools.last_change = Instant::now();
                    trace!(permit = id, "permit acquired.");
                    return Permit { id };
                }
            }

            notified.await;
        }
    }

    /// Return `permit` with the outcome of the request it authorised.
    pub fn report(&self, permit: Permit, success: bool) {
        let id = permit.id;
        let mut pools = self.inner.pools.lock().unwrap();

        let was_active = pools.active.remove(&id);
        assert!(was_active, "permit {id} reported while not active");
        pools.last_change = Instant::now();

        if success {
            pools.available.push(id);
            let longest_cooling = pools.failed.front().copied();
            drop(pools);

            self.inner.permit_returned.notify_waiters();
            if let Some(cooling) = longest_cooling {
                self.schedule_restore(cooling, self.inner.restore_delay);
            }
            return;
        }

        let last_permit = pools.available.is_empty() && pools.active.is_empty();
        let cooling = pools.start_cooling(id);
        let snapshot = self.snapshot_locked(&pools);
        drop(pools);

        if last_permit {
            debug!(permit = id, "last permit failed, restoring without cool down.");
            self.schedule_restore(cooling, Duration::ZERO);
        } else {
            debug!(
                permit = id,
                available = snapshot.available,
                active = snapshot.active,
                failed = snapshot.failed,
                "permit is cooling down."
            );
            self.schedule_restore(cooling, self.inner.restore_delay);
        }
    }

    fn schedule_restore(&self, target: Cooling, delay: Duration) {
        let inner = self.inner.clone();

        self.inner.restorations.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let restored = inner.pools.lock().unwrap().restore(target);
            if let Some(id) = restored {
                debug!(permit = id, "permit has been restored.");
                inner.permit_returned.notify_waiters();
            }
        });
    }

    /// Wait until every permit is back in the available pool, no restoration
    /// is pending, and nothing has moved for `quiet_period`.
    pub async fn wait_done(&self, quiet_period: Duration) {
        let poll_interval = quiet_period
            .min(WAIT_DONE_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL);

        loop {
            if self.is_quiescent(quiet_period) {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn is_quiescent(&self, quiet_period: Duration) -> bool {
        let pools = self.inner.pools.lock().unwrap();
        pools.available.len() == self.inner.capacity
            && self.inner.restorations.is_empty()
            && pools.last_change.elapsed() >= quiet_period
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let pools = self.inner.pools.lock().unwrap();
        self.snapshot_locked(&pools)
    }

    fn snapshot_locked(&self, pools: &Pools) -> PoolSnapshot {
        PoolSnapshot {
            available: pools.available.len(),
            active: pools.active.len(),
            failed: pools.failed.len(),
            restoring: self.inner.restorations.len(),
        }
    }
}
