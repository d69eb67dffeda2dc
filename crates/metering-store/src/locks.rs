//! Per-key mutual exclusion.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A table of mutexes keyed by byte strings.
///
/// Holders of different keys never block each other. Entries are dropped
/// once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &[u8], f: impl FnOnce() -> R) -> R {
        let mutex = self
            .locks
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = mutex.lock();
            f()
        };

        drop(mutex);
        // Shard lock is held during the check, so no one can clone in between.
        self.locks.remove_if(key, |_, m| Arc::strong_count(m) == 1);
        result
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no entry is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with_lock(b"k", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn returns_closure_result() {
        let locks = KeyLocks::new();
        assert_eq!(locks.with_lock(b"a", || 42), 42);
        assert_eq!(locks.len(), 0);
    }
}
