use crate::error::StoreResult;
use crate::models::{HeaderMap, Message, Subscription, Topic, User, UserId};
use async_trait::async_trait;

/// User account storage (§6). Any conforming implementation — Postgres,
/// sqlite, or the in-memory fake in [`crate::memory`] — is acceptable to
/// the topic engine.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: User) -> StoreResult<User>;
    async fn get(&self, id: UserId) -> StoreResult<User>;
    async fn update(&self, user: User) -> StoreResult<User>;
    async fn delete(&self, id: UserId) -> StoreResult<()>;
    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn create(&self, topic: Topic) -> StoreResult<Topic>;
    async fn get(&self, name: &str) -> StoreResult<Topic>;
    async fn update(&self, topic: Topic) -> StoreResult<Topic>;
    async fn delete(&self, name: &str) -> StoreResult<()>;
    async fn owner_change(&self, name: &str, new_owner: UserId) -> StoreResult<()>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn upsert(&self, sub: Subscription) -> StoreResult<Subscription>;
    async fn get_for_user(&self, user: UserId) -> StoreResult<Vec<Subscription>>;
    async fn get_for_topic(&self, topic: &str) -> StoreResult<Vec<Subscription>>;
    async fn get(&self, topic: &str, user: UserId) -> StoreResult<Subscription>;
    async fn delete(&self, topic: &str, user: UserId) -> StoreResult<()>;
}

/// Range query bounds for `MessageStore::get_range`: `since <= seq < before`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqQuery {
    pub since: Option<i64>,
    pub before: Option<i64>,
    pub limit: u32,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Atomically allocates the next seq for `msg.topic` and persists the
    /// message. On failure the caller must treat `lastSeq` as unchanged
    /// (§4.4 rollback).
    async fn save(&self, msg: Message) -> StoreResult<i64>;
    async fn get_range(&self, topic: &str, query: SeqQuery) -> StoreResult<Vec<Message>>;
    async fn get_one(&self, topic: &str, seq: i64) -> StoreResult<Message>;
    /// Soft or hard deletion of a set of seqs. `for_user` is `None` for a
    /// hard delete (visible to nobody) and `Some(user)` for a soft delete
    /// (invisible only to that user).
    async fn delete_list(
        &self,
        topic: &str,
        ranges: &[(i64, i64)],
        hard: bool,
        for_user: Option<UserId>,
    ) -> StoreResult<()>;
    async fn update_header(
        &self,
        topic: &str,
        seq: i64,
        header_delta: HeaderMap,
        content: Option<serde_json::Value>,
    ) -> StoreResult<()>;
}

/// Aggregate handle bundling the four capability stores, mirroring how the
/// engine is actually wired up (one pool, four narrow interfaces).
pub trait Store: UserStore + TopicStore + SubscriptionStore + MessageStore {}
impl<T: UserStore + TopicStore + SubscriptionStore + MessageStore> Store for T {}
