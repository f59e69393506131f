//! Latest-value state broadcaster.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Single-slot, last-write-wins holder of the current state.
///
/// Not a queue: a burst of writes before a read exposes only the last one.
/// Readers never wait; they get whatever was written most recently, which may
/// be stale relative to a reduction still in progress.
#[derive(Debug)]
pub struct StateCache<S> {
    slot: RwLock<S>,
    version: AtomicU64,
    closed: AtomicBool,
}

impl<S: Clone> StateCache<S> {
    pub fn new(initial: S) -> Self {
        Self {
            slot: RwLock::new(initial),
            version: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the held state. Ignored once the cache is closed.
    pub fn write(&self, value: S) -> bool {
        if self.is_closed() {
            return false;
        }
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = value;
        self.version.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn read_latest(&self) -> S {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of writes accepted so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Close the cache. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_with_initial_value() {
        let cache = StateCache::new(7);
        assert_eq!(cache.read_latest(), 7);
        assert_eq!(cache.version(), 0);
    }

    #[test]
    fn burst_of_writes_exposes_only_the_last() {
        let cache = StateCache::new("s-init");
        cache.write("s0");
        cache.write("s1");
        cache.write("s2");
        assert_eq!(cache.read_latest(), "s2");
        assert_eq!(cache.version(), 3);
    }

    #[test]
    fn close_is_idempotent_and_freezes_value() {
        let cache = StateCache::new(1);
        assert!(cache.close());
        assert!(!cache.close());
        assert!(!cache.write(2));
        assert_eq!(cache.read_latest(), 1);
    }

    #[test]
    fn concurrent_readers_never_see_torn_values() {
        let cache = Arc::new(StateCache::new((0u64, 0u64)));
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 1..=1_000u64 {
                    cache.write((i, i * 2));
                }
            })
        };

        for _ in 0..1_000 {
            let (a, b) = cache.read_latest();
            assert_eq!(b, a * 2);
        }
        writer.join().unwrap();
        assert_eq!(cache.read_latest(), (1_000, 2_000));
    }
}
