use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Default number of conversations that may hold an engine at once.
pub const DEFAULT_MAX_SESSIONS: usize = 3;

/// What the pool needs from a pooled engine.
pub trait SessionCore: Send + Sync {
    /// Stop any in-flight generation. Must be idempotent.
    fn stop_stream(&self);

    fn is_active(&self) -> bool;
}

type SessionFactory<T> = Box<dyn Fn(&str) -> T + Send + Sync>;

struct SessionEntry<T> {
    core: Arc<T>,
    last_used: u64,
}

struct SessionMap<T> {
    entries: FxHashMap<String, SessionEntry<T>>,
    tick: u64,
}

impl<T> SessionMap<T> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_oldest(&mut self) -> Option<(String, Arc<T>)> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone())?;
        self.entries
            .remove(&oldest)
            .map(|entry| (oldest, entry.core))
    }
}

/// Bounded conversation-id -> engine map with least-recently-used eviction.
///
/// Every mutation sequence runs under a single lock acquisition and no lock is
/// held while an evicted or removed engine is stopped.
pub struct SessionManager<T> {
    factory: SessionFactory<T>,
    capacity: usize,
    inner: Mutex<SessionMap<T>>,
}

impl<T> std::fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl<T: SessionCore> SessionManager<T> {
    /// `capacity` is clamped to at least one entry.
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(&str) -> T + Send + Sync + 'static,
    {
        let capacity = capacity.max(1);
        Self {
            factory: Box::new(factory),
            capacity,
            inner: Mutex::new(SessionMap {
                entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
                tick: 0,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Existing engine for `id`, without refreshing its recency.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<Arc<T>> {
        self.inner
            .lock()
            .entries
            .get(id)
            .map(|entry| Arc::clone(&entry.core))
    }

    /// Return the engine for `id`, creating it (and evicting the least recently
    /// used entry when full) if absent.
    pub fn get_session(&self, id: &str) -> Arc<T> {
        let (core, evicted) = {
            let mut map = self.inner.lock();
            let tick = map.next_tick();
            if let Some(entry) = map.entries.get_mut(id) {
                entry.last_used = tick;
                return Arc::clone(&entry.core);
            }

            let evicted = if map.entries.len() >= self.capacity {
                map.evict_oldest()
            } else {
                None
            };
            let core = Arc::new((self.factory)(id));
            map.entries.insert(
                id.to_string(),
                SessionEntry {
                    core: Arc::clone(&core),
                    last_used: tick,
                },
            );
            (core, evicted)
        };

        if let Some((evicted_id, evicted_core)) = evicted {
            tracing::info!(
                evicted = %evicted_id,
                incoming = %id,
                active = evicted_core.is_active(),
                "session pool full, evicting least recently used conversation"
            );
            evicted_core.stop_stream();
        }
        core
    }

    /// Remove and stop the engine for `id`. Returns whether an entry existed.
    pub fn cleanup_session(&self, id: &str) -> bool {
        let removed = self.inner.lock().entries.remove(id);
        match removed {
            Some(entry) => {
                entry.core.stop_stream();
                true
            }
            None => false,
        }
    }

    /// Remove `id` only if it still maps to `core` and that engine is idle.
    pub fn release_session(&self, id: &str, core: &Arc<T>) -> bool {
        let mut map = self.inner.lock();
        let releasable = map
            .entries
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.core, core) && !entry.core.is_active());
        if releasable {
            map.entries.remove(id);
        }
        releasable
    }

    /// Drain the pool and stop every engine.
    pub fn stop_all_sessions(&self) {
        let drained: Vec<(String, SessionEntry<T>)> = self.inner.lock().entries.drain().collect();
        for (id, entry) in drained {
            tracing::debug!(conversation = %id, "stopping session");
            entry.core.stop_stream();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCore {
        active: AtomicBool,
        stops: AtomicUsize,
    }

    impl SessionCore for FakeCore {
        fn stop_stream(&self) {
            self.active.store(false, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    fn manager(capacity: usize) -> (SessionManager<FakeCore>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let manager = SessionManager::new(capacity, move |_id: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            FakeCore::default()
        });
        (manager, created)
    }

    #[test]
    fn test_get_session_reuses_existing() {
        let (manager, created) = manager(3);
        let a = manager.get_session("a");
        let again = manager.get_session("a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let (manager, _) = manager(3);
        let a = manager.get_session("a");
        manager.get_session("b");
        manager.get_session("c");
        // refresh a so b becomes the oldest
        manager.get_session("a");
        manager.get_session("d");

        assert_eq!(manager.len(), 3);
        assert!(manager.contains("a"));
        assert!(!manager.contains("b"));
        assert!(manager.contains("c"));
        assert!(manager.contains("d"));
        assert_eq!(a.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_eviction_stops_evicted_engine() {
        let (manager, _) = manager(1);
        let a = manager.get_session("a");
        a.active.store(true, Ordering::SeqCst);
        manager.get_session("b");
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert!(!a.is_active());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (manager, _) = manager(3);
        let a = manager.get_session("a");
        assert!(manager.cleanup_session("a"));
        assert!(!manager.cleanup_session("a"));
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_release_only_matching_idle_engine() {
        let (manager, _) = manager(3);
        let a = manager.get_session("a");
        a.active.store(true, Ordering::SeqCst);
        assert!(!manager.release_session("a", &a));

        a.active.store(false, Ordering::SeqCst);
        let stranger = Arc::new(FakeCore::default());
        assert!(!manager.release_session("a", &stranger));
        assert!(manager.release_session("a", &a));
        assert!(!manager.contains("a"));
    }

    #[test]
    fn test_stop_all_sessions() {
        let (manager, _) = manager(3);
        let cores: Vec<_> = ["a", "b", "c"].iter().map(|id| manager.get_session(id)).collect();
        manager.stop_all_sessions();
        assert!(manager.is_empty());
        for core in cores {
            assert_eq!(core.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (manager, _) = manager(0);
        assert_eq!(manager.capacity(), 1);
        manager.get_session("a");
        manager.get_session("b");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_concurrent_get_never_duplicates() {
        let (manager, created) = manager(3);
        let manager = Arc::new(manager);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        manager.get_session("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
