//! Per-key mutual exclusion for cache population.
//!
//! At most one task holds the lease for a given key. Waiters queue on the
//! same async mutex, so when the holder finishes the next waiter re-checks the
//! cache instead of repeating the work. Entries are removed from the table once
//! no lease or waiter references them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::keys::CacheKey;

pub const LEASE_WAIT_TOTAL: &str = "pixcache_lease_wait_total";

type LeaseTable = DashMap<CacheKey, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct ConcurrencyGate {
    leases: Arc<LeaseTable>,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lease on `key`.
    pub async fn acquire(&self, key: &CacheKey) -> Lease {
        let slot = self.slot(key);
        let guard = match Arc::clone(&slot.mutex).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                metrics::counter!(LEASE_WAIT_TOTAL).increment(1);
                debug!(
                    target = "cache::gate",
                    op = "acquire",
                    result = "wait",
                    cache_key = %key,
                    "Waiting for in-flight population"
                );
                Arc::clone(&slot.mutex).lock_owned().await
            }
        };
        Lease {
            guard: Some(guard),
            slot,
        }
    }

    /// Take the lease on `key` only if nobody holds it.
    pub fn try_acquire(&self, key: &CacheKey) -> Option<Lease> {
        let slot = self.slot(key);
        let guard = Arc::clone(&slot.mutex).try_lock_owned().ok()?;
        Some(Lease {
            guard: Some(guard),
            slot,
        })
    }

    /// Number of keys with a live lease or waiter.
    pub fn in_flight(&self) -> usize {
        self.leases.len()
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mutex = Arc::clone(
            self.leases
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        Slot {
            key: key.clone(),
            mutex,
            leases: Arc::clone(&self.leases),
        }
    }
}

/// A counted reference to a table entry. The last one out removes the entry,
/// whether or not it ever held the lock.
struct Slot {
    key: CacheKey,
    mutex: Arc<Mutex<()>>,
    leases: Arc<LeaseTable>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let key = &self.key;
        // The table's reference plus ours: nobody else holds or awaits the key.
        self.leases
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}

/// Exclusive right to populate one key. Released on drop.
pub struct Lease {
    guard: Option<OwnedMutexGuard<()>>,
    slot: Slot,
}

impl Lease {
    pub fn key(&self) -> &CacheKey {
        &self.slot.key
    }

    pub fn release(self) {}
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Unlock before the slot is dropped so its count check sees no guard.
        drop(self.guard.take());
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("key", self.key()).finish()
    }
}
