use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::{Condvar, Mutex},
};

use crate::error::{Error, Result};

/// How a cache materialises and retires its entries. Implementations
/// are stateless views over the owning store, per-store instantiated.
pub trait CacheSource<K, V> {
    fn load(&self, key: &K) -> Result<V>;

    /// The last pin on `key` was returned; the entry stays cached and
    /// becomes eligible for eviction.
    fn on_unpinned(&self, key: &K, value: &V) -> Result<()>;

    /// The entry is leaving the cache for good.
    fn on_evict(&self, key: &K, value: &V) -> Result<()>;
}

/// Reference-counted cache with at most one concurrent loader per key.
///
/// A miss marks the key as loading, drops the bookkeeping lock for the
/// duration of the load, and wakes waiters when the value lands; every
/// simultaneous requester shares the one loaded value. Eviction only
/// considers entries with no pins, preferring the one that has been
/// unpinned the longest.
pub struct RcCache<K, V> {
    capacity: usize,
    state: Mutex<State<K, V>>,
    loaded: Condvar,
}

struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
    loading: HashSet<K>,
    idle: VecDeque<K>,
}

struct Slot<V> {
    value: V,
    pins: usize,
}

impl<K, V> RcCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                entries: HashMap::new(),
                loading: HashSet::new(),
                idle: VecDeque::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    /// Fetch `key`, pinning the entry. Loads through `source` on miss.
    pub fn get<S: CacheSource<K, V>>(&self, key: K, source: &S) -> Result<V> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(slot) = state.entries.get_mut(&key) {
                slot.pins += 1;
                return Ok(slot.value.clone());
            }

            if state.loading.contains(&key) {
                state = self.loaded.wait(state).unwrap();
                continue;
            }

            if self.capacity > 0 && state.entries.len() + state.loading.len() >= self.capacity {
                self.evict_one(&mut state, source)?;
            }
            state.loading.insert(key.clone());
            break;
        }
        drop(state);

        let outcome = source.load(&key);

        let mut state = self.state.lock().unwrap();
        state.loading.remove(&key);
        self.loaded.notify_all();
        match outcome {
            Ok(value) => {
                state.entries.insert(
                    key,
                    Slot {
                        value: value.clone(),
                        pins: 1,
                    },
                );
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Return one pin. At zero pins the entry is handed to
    /// `on_unpinned` (dirty write-back) and queued for eviction.
    pub fn release<S: CacheSource<K, V>>(&self, key: &K, source: &S) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let slot = match state.entries.get_mut(key) {
            Some(slot) => slot,
            None => return Ok(()),
        };
        debug_assert!(slot.pins > 0);
        slot.pins -= 1;
        if slot.pins == 0 {
            let value = slot.value.clone();
            state.idle.push_back(key.clone());
            source.on_unpinned(key, &value)?;
        }
        Ok(())
    }

    fn evict_one<S: CacheSource<K, V>>(&self, state: &mut State<K, V>, source: &S) -> Result<()> {
        while let Some(candidate) = state.idle.pop_front() {
            let evictable = matches!(state.entries.get(&candidate), Some(slot) if slot.pins == 0);
            if !evictable {
                // re-pinned since it was queued
                continue;
            }
            let slot = state.entries.remove(&candidate).unwrap();
            source.on_evict(&candidate, &slot.value)?;
            return Ok(());
        }
        Err(Error::CacheFull)
    }

    /// Drop every entry, pinned or not, running `on_evict` for each.
    /// Used at close, once no caller can still hold pins.
    pub fn clear<S: CacheSource<K, V>>(&self, source: &S) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.idle.clear();
        for (key, slot) in state.entries.drain() {
            source.on_evict(&key, &slot.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        loads: AtomicUsize,
        evicts: AtomicUsize,
    }

    impl CacheSource<u32, u32> for Counting {
        fn load(&self, key: &u32) -> Result<u32> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(*key * 10)
        }

        fn on_unpinned(&self, _: &u32, _: &u32) -> Result<()> {
            Ok(())
        }

        fn on_evict(&self, _: &u32, _: &u32) -> Result<()> {
            self.evicts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> Counting {
        Counting {
            loads: AtomicUsize::new(0),
            evicts: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_hit_does_not_reload() {
        let cache = RcCache::new(0);
        let src = counting();
        assert_eq!(cache.get(3, &src).unwrap(), 30);
        assert_eq!(cache.get(3, &src).unwrap(), 30);
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
        cache.release(&3, &src).unwrap();
        cache.release(&3, &src).unwrap();
    }

    #[test]
    fn test_full_cache_rejects_when_all_pinned() {
        let cache = RcCache::new(2);
        let src = counting();
        cache.get(1, &src).unwrap();
        cache.get(2, &src).unwrap();
        match cache.get(3, &src) {
            Err(Error::CacheFull) => {}
            other => panic!("expected CacheFull, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unpinned_entry_is_evicted_for_room() {
        let cache = RcCache::new(2);
        let src = counting();
        cache.get(1, &src).unwrap();
        cache.get(2, &src).unwrap();
        cache.release(&1, &src).unwrap();
        assert_eq!(cache.get(3, &src).unwrap(), 30);
        assert_eq!(src.evicts.load(Ordering::SeqCst), 1);
        // key 1 was evicted, a fresh get loads again
        cache.release(&2, &src).unwrap();
        cache.get(1, &src).unwrap();
        assert_eq!(src.loads.load(Ordering::SeqCst), 4);
    }
}
