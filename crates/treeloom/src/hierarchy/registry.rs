//! Host-owned registry of open hierarchy stores, one per session.
//!
//! The registry is created by the host process and passed by reference to
//! whatever needs a store. Opening the same session twice returns the same
//! [`HierarchyStore`] instance, so all in-process callers share one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::store::{HierarchyStore, StoreConfig};
use crate::storage::{DocumentStore, StoreError};

/// Registry of open [`HierarchyStore`]s keyed by session id.
pub struct SessionRegistry {
    backend: Arc<dyn DocumentStore>,
    config: StoreConfig,
    stores: Mutex<HashMap<String, Arc<HierarchyStore>>>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn DocumentStore>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Store for `session_id`, opening it on first use.
    pub fn open(&self, session_id: &str) -> Arc<HierarchyStore> {
        let mut stores = self.lock();
        if let Some(store) = stores.get(session_id) {
            return Arc::clone(store);
        }
        debug!("Registry opening session {session_id}");
        let store = Arc::new(HierarchyStore::open(
            session_id,
            Arc::clone(&self.backend),
            self.config.clone(),
        ));
        stores.insert(session_id.to_string(), Arc::clone(&store));
        store
    }

    /// Store for `session_id` if it is already open.
    pub fn get(&self, session_id: &str) -> Option<Arc<HierarchyStore>> {
        self.lock().get(session_id).cloned()
    }

    /// Flush (if dirty) and forget the store for `session_id`. Returns
    /// whether it was open.
    ///
    /// Other holders of the `Arc` keep a working store, but later `open`
    /// calls create a fresh instance from the backing documents.
    pub fn close(&self, session_id: &str) -> bool {
        let Some(store) = self.lock().remove(session_id) else {
            return false;
        };
        if store.is_dirty()
            && let Err(e) = store.flush()
        {
            warn!("Failed to flush session {session_id} on close: {e}");
        }
        true
    }

    /// Flush every open store with unsaved changes, returning the sessions
    /// that failed.
    pub fn flush_all(&self) -> Vec<(String, StoreError)> {
        let stores: Vec<Arc<HierarchyStore>> = self.lock().values().cloned().collect();
        stores
            .into_iter()
            .filter(|store| store.is_dirty())
            .filter_map(|store| {
                store
                    .flush()
                    .err()
                    .map(|e| (store.session_id().to_string(), e))
            })
            .collect()
    }

    /// Sorted ids of open sessions.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<HierarchyStore>>> {
        self.stores.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for (session_id, e) in self.flush_all() {
            warn!("Failed to flush session {session_id} on shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::store::Persistence;
    use crate::storage::MemoryDocumentStore;

    fn registry(config: StoreConfig) -> (Arc<MemoryDocumentStore>, SessionRegistry) {
        let backend = Arc::new(MemoryDocumentStore::new());
        let registry = SessionRegistry::new(backend.clone(), config);
        (backend, registry)
    }

    #[test]
    fn open_returns_shared_instance() {
        let (_, registry) = registry(StoreConfig::default());
        let a = registry.open("s1");
        let b = registry.open("s1");
        assert!(Arc::ptr_eq(&a, &b));

        let id = a.push_frame("writer", "draft");
        assert_eq!(b.current_top(), Some(id));
    }

    #[test]
    fn sessions_are_isolated() {
        let (_, registry) = registry(StoreConfig::default());
        registry.open("s1").push_frame("a", "1");
        assert_eq!(registry.open("s2").current_top(), None);
        assert_eq!(registry.sessions(), vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn close_flushes_and_forgets() {
        let config = StoreConfig::new().with_persistence(Persistence::Manual);
        let (backend, registry) = registry(config);
        let id = registry.open("s1").push_frame("a", "1");
        assert!(backend.keys().is_empty());

        assert!(registry.close("s1"));
        assert!(!registry.close("s1"));
        assert_eq!(backend.keys().len(), 2);
        assert!(registry.get("s1").is_none());

        // Reopening reads the flushed documents.
        assert_eq!(registry.open("s1").current_top(), Some(id));
    }

    #[test]
    fn drop_flushes_manual_sessions() {
        let backend = Arc::new(MemoryDocumentStore::new());
        {
            let registry = SessionRegistry::new(
                backend.clone(),
                StoreConfig::new().with_persistence(Persistence::Manual),
            );
            registry.open("s1").register_instruction("go");
        }
        assert_eq!(backend.keys().len(), 2);
    }
}
