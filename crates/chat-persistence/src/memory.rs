//! An in-memory fake of the four store traits, for unit-testing the topic
//! actor without a database (§9: "back it with a fake in memory").

use crate::error::{StoreError, StoreResult};
use crate::models::{HeaderMap, Message, Subscription, Topic, User, UserId};
use crate::traits::{MessageStore, SeqQuery, SubscriptionStore, TopicStore, UserStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    next_user_id: UserId,
    topics: HashMap<String, Topic>,
    subs: HashMap<(String, UserId), Subscription>,
    messages: HashMap<String, Vec<Message>>,
}

/// Single shared handle; clone freely, all clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, mut user: User) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if user.id == 0 {
            inner.next_user_id += 1;
            user.id = inner.next_user_id;
        } else if inner.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate);
        }
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> StoreResult<User> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, user: User) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: UserId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(u) = inner.users.get_mut(&id) {
            u.deleted_at = Some(chrono::Utc::now());
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .filter(|u| u.tags.iter().any(|t| t == tag))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn create(&self, topic: Topic) -> StoreResult<Topic> {
        let mut inner = self.inner.write().await;
        if inner.topics.contains_key(&topic.name) {
            return Err(StoreError::Duplicate);
        }
        inner.topics.insert(topic.name.clone(), topic.clone());
        Ok(topic)
    }

    async fn get(&self, name: &str) -> StoreResult<Topic> {
        self.inner
            .read()
            .await
            .topics
            .get(name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, topic: Topic) -> StoreResult<Topic> {
        let mut inner = self.inner.write().await;
        if !inner.topics.contains_key(&topic.name) {
            return Err(StoreError::NotFound);
        }
        inner.topics.insert(topic.name.clone(), topic.clone());
        Ok(topic)
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.topics.remove(name).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn owner_change(&self, name: &str, new_owner: UserId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let topic = inner.topics.get_mut(name).ok_or(StoreError::NotFound)?;
        topic.owner = Some(new_owner);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert(&self, sub: Subscription) -> StoreResult<Subscription> {
        let mut inner = self.inner.write().await;
        inner
            .subs
            .insert((sub.topic.clone(), sub.user), sub.clone());
        Ok(sub)
    }

    async fn get_for_user(&self, user: UserId) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subs
            .values()
            .filter(|s| s.user == user)
            .cloned()
            .collect())
    }

    async fn get_for_topic(&self, topic: &str) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subs
            .values()
            .filter(|s| s.topic == topic)
            .cloned()
            .collect())
    }

    async fn get(&self, topic: &str, user: UserId) -> StoreResult<Subscription> {
        self.inner
            .read()
            .await
            .subs
            .get(&(topic.to_owned(), user))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, topic: &str, user: UserId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .subs
            .remove(&(topic.to_owned(), user))
            .ok_or(StoreError::NotFound)?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, mut msg: Message) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        let topic = inner.topics.get_mut(&msg.topic).ok_or(StoreError::NotFound)?;
        let seq = topic.last_seq + 1;
        topic.last_seq = seq;
        topic.touched_at = msg.created_at;
        msg.seq = seq;
        inner.messages.entry(msg.topic.clone()).or_default().push(msg);
        Ok(seq)
    }

    async fn get_range(&self, topic: &str, query: SeqQuery) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let Some(list) = inner.messages.get(topic) else {
            return Ok(Vec::new());
        };
        let since = query.since.unwrap_or(1);
        let before = query.before.unwrap_or(i64::MAX);
        let limit = if query.limit == 0 { u32::MAX } else { query.limit } as usize;
        Ok(list
            .iter()
            .filter(|m| m.seq >= since && m.seq < before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_one(&self, topic: &str, seq: i64) -> StoreResult<Message> {
        let inner = self.inner.read().await;
        inner
            .messages
            .get(topic)
            .and_then(|list| list.iter().find(|m| m.seq == seq))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_list(
        &self,
        topic: &str,
        ranges: &[(i64, i64)],
        hard: bool,
        for_user: Option<UserId>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let Some(list) = inner.messages.get_mut(topic) else {
            return Ok(());
        };
        for msg in list.iter_mut() {
            if !ranges.iter().any(|(lo, hi)| msg.seq >= *lo && msg.seq < *hi) {
                continue;
            }
            if hard {
                msg.content = None;
                msg.tombstoned = true;
                msg.head.insert("deleted".to_owned(), serde_json::Value::Bool(true));
            } else if let Some(user) = for_user {
                if !msg.deleted_for.contains(&user) {
                    msg.deleted_for.push(user);
                }
            }
        }
        Ok(())
    }

    async fn update_header(
        &self,
        topic: &str,
        seq: i64,
        header_delta: HeaderMap,
        content: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let msg = inner
            .messages
            .get_mut(topic)
            .and_then(|list| list.iter_mut().find(|m| m.seq == seq))
            .ok_or(StoreError::NotFound)?;
        for (k, v) in header_delta {
            msg.head.insert(k, v);
        }
        if let Some(c) = content {
            msg.content = Some(c);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TopicKind;
    use chat_proto::AccessMode;
    use chrono::Utc;

    #[tokio::test]
    async fn message_save_allocates_contiguous_seqs() {
        let store = MemoryStore::new();
        store
            .create(Topic::new("grpX", TopicKind::Grp, Utc::now()))
            .await
            .unwrap();

        for i in 0..5 {
            let seq = store
                .save(Message {
                    topic: "grpX".to_owned(),
                    seq: 0,
                    from: 1,
                    created_at: Utc::now(),
                    head: HeaderMap::new(),
                    content: Some(serde_json::json!(i)),
                    deleted_for: Vec::new(),
                    tombstoned: false,
                })
                .await
                .unwrap();
            assert_eq!(seq, i + 1);
        }
        let topic = TopicStore::get(&store, "grpX").await.unwrap();
        assert_eq!(topic.last_seq, 5);
    }

    #[tokio::test]
    async fn hard_delete_clears_content_for_everyone() {
        let store = MemoryStore::new();
        store
            .create(Topic::new("grpX", TopicKind::Grp, Utc::now()))
            .await
            .unwrap();
        store
            .save(Message {
                topic: "grpX".to_owned(),
                seq: 0,
                from: 1,
                created_at: Utc::now(),
                head: HeaderMap::new(),
                content: Some(serde_json::json!("hello")),
                deleted_for: Vec::new(),
                tombstoned: false,
            })
            .await
            .unwrap();

        store.delete_list("grpX", &[(1, 2)], true, None).await.unwrap();
        let msg = store.get_one("grpX", 1).await.unwrap();
        assert!(msg.content.is_none());
        assert!(msg.tombstoned);
    }

    #[tokio::test]
    async fn soft_delete_is_isolated_to_caller() {
        let store = MemoryStore::new();
        store
            .create(Topic::new("grpX", TopicKind::Grp, Utc::now()))
            .await
            .unwrap();
        store
            .save(Message {
                topic: "grpX".to_owned(),
                seq: 0,
                from: 1,
                created_at: Utc::now(),
                head: HeaderMap::new(),
                content: Some(serde_json::json!("hello")),
                deleted_for: Vec::new(),
                tombstoned: false,
            })
            .await
            .unwrap();

        store.delete_list("grpX", &[(1, 2)], false, Some(9)).await.unwrap();
        let msg = store.get_one("grpX", 1).await.unwrap();
        assert!(msg.is_visible_to(1));
        assert!(!msg.is_visible_to(9));
    }

    #[tokio::test]
    async fn subscription_cursor_bumps_are_monotone() {
        let mut sub = Subscription::new("grpX", 1, AccessMode::MEMBER_DEFAULT, AccessMode::MEMBER_DEFAULT, Utc::now());
        assert!(sub.bump_recv(3));
        assert!(!sub.bump_recv(1));
        assert_eq!(sub.recv_seq, 3);
        assert!(sub.bump_read(5));
        assert_eq!(sub.recv_seq, 5);
    }
}
