//! Topic registry (§4.6): a process-wide concurrent map from topic name
//! to its actor handle. Get-or-spawn is the only write path that matters
//! under load, so it uses double-checked locking (read lock first,
//! escalate to a write lock only on a miss).

use crate::topic::{self, TopicHandle};
use chat_persistence::{Store, StoreError, StoreResult, Topic, TopicStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct Hub {
    store: Arc<dyn Store>,
    topics: Arc<RwLock<HashMap<String, TopicHandle>>>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns a handle to the already-running actor for `name`, or spawns
    /// one after loading (or creating) its persisted row.
    pub async fn get_or_spawn(&self, name: &str, new_topic: impl FnOnce() -> Topic) -> StoreResult<TopicHandle> {
        if let Some(handle) = self.topics.read().await.get(name) {
            return Ok(handle.clone());
        }

        let mut topics = self.topics.write().await;
        if let Some(handle) = topics.get(name) {
            return Ok(handle.clone());
        }

        let row = match TopicStore::get(&*self.store, name).await {
            Ok(row) => row,
            Err(StoreError::NotFound) => TopicStore::create(&*self.store, new_topic()).await?,
            Err(e) => return Err(e),
        };
        let handle = topic::spawn(self.store.clone(), row, self.clone());
        topics.insert(name.to_owned(), handle.clone());
        Ok(handle)
    }

    pub async fn lookup(&self, name: &str) -> Option<TopicHandle> {
        self.topics.read().await.get(name).cloned()
    }

    /// Drops the registry's handle to a retired actor. Safe to call even
    /// if the actor already exited on its own idle timeout; the send will
    /// simply fail and the caller ignores it.
    pub async fn deregister(&self, name: &str) {
        self.topics.write().await.remove(name);
    }

    pub async fn topic_names(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }

    pub async fn live_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_persistence::{MemoryStore, TopicKind};
    use chrono::Utc;

    #[tokio::test]
    async fn get_or_spawn_creates_once_and_reuses_handle() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = Hub::new(store);

        let a = hub.get_or_spawn("grpX", || Topic::new("grpX", TopicKind::Grp, Utc::now())).await.unwrap();
        let b = hub.get_or_spawn("grpX", || Topic::new("grpX", TopicKind::Grp, Utc::now())).await.unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(hub.live_count().await, 1);
    }

    #[tokio::test]
    async fn deregister_removes_from_registry() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = Hub::new(store);
        hub.get_or_spawn("grpX", || Topic::new("grpX", TopicKind::Grp, Utc::now())).await.unwrap();
        hub.deregister("grpX").await;
        assert!(hub.lookup("grpX").await.is_none());
    }
}
