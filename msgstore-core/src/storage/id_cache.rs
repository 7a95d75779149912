//! In-process set of message ids polled but not yet acknowledged

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Many pollers read the set to build their exclusion list; inserts and
/// evictions take the write lock briefly.
#[derive(Debug, Default)]
pub(crate) struct IdCache {
    ids: RwLock<HashSet<Uuid>>,
}

impl IdCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still guards a plain set of ids, so keep using it.
    fn read(&self) -> RwLockReadGuard<'_, HashSet<Uuid>> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<Uuid>> {
        self.ids.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, id: Uuid) -> bool {
        self.write().insert(id)
    }

    pub(crate) fn remove(&self, id: &Uuid) -> bool {
        self.write().remove(id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &Uuid) -> bool {
        self.read().contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    /// Ids to exclude from the next poll
    pub(crate) fn snapshot(&self) -> Vec<Uuid> {
        self.read().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_evict() {
        let cache = IdCache::new();
        let id = Uuid::now_v7();

        assert!(cache.insert(id));
        assert!(!cache.insert(id));
        assert!(cache.contains(&id));
        assert_eq!(cache.snapshot(), vec![id]);

        assert!(cache.remove(&id));
        assert!(!cache.remove(&id));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_recovers_from_poisoning() {
        let cache = Arc::new(IdCache::new());
        let id = Uuid::now_v7();
        cache.insert(id);

        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.ids.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(cache.ids.is_poisoned());
        assert!(cache.contains(&id));
        assert!(cache.remove(&id));
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = IdCache::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        cache.insert(Uuid::now_v7());
                        let _ = cache.snapshot();
                    }
                });
            }
        });
        assert_eq!(cache.len(), 800);
    }
}
