//! Message / sequence engine (§4.4): seq allocation through the store,
//! history retrieval with soft-delete/tombstone filtering, and the
//! optional edit/unsend/reaction header-mutation semantics.

use chat_persistence::{HeaderMap, Message, SeqQuery, Store, StoreError, StoreResult, UserId};
use chrono::{DateTime, Duration, Utc};

/// Edits permitted for 15 minutes and at most 10 times per message.
pub const EDIT_WINDOW: Duration = Duration::minutes(15);
pub const MAX_EDITS: u32 = 10;
/// Unsend permitted for 10 minutes after the original publish.
pub const UNSEND_WINDOW: Duration = Duration::minutes(10);

/// Publish a new message, allocating the next seq atomically with the
/// store write. On `StoreError` the caller must not have observed any
/// change to the topic's advertised `lastSeq` (the store is responsible
/// for the rollback half of that contract).
pub async fn publish(
    store: &dyn Store,
    topic: &str,
    from: UserId,
    head: HeaderMap,
    content: serde_json::Value,
    now: DateTime<Utc>,
) -> StoreResult<i64> {
    let msg = Message {
        topic: topic.to_owned(),
        seq: 0,
        from,
        created_at: now,
        head,
        content: Some(content),
        deleted_for: Vec::new(),
        tombstoned: false,
    };
    store.save(msg).await
}

/// A message as seen by one particular caller: soft-deletes and
/// tombstones have already been resolved into `content: None`.
#[derive(Debug, Clone)]
pub struct VisibleMessage {
    pub seq: i64,
    pub from: UserId,
    pub created_at: DateTime<Utc>,
    pub head: HeaderMap,
    pub content: Option<serde_json::Value>,
}

impl From<(Message, UserId)> for VisibleMessage {
    fn from((msg, caller): (Message, UserId)) -> Self {
        let hidden_for_caller = msg.deleted_for.contains(&caller);
        let content = if msg.tombstoned || hidden_for_caller {
            None
        } else {
            msg.content
        };
        VisibleMessage {
            seq: msg.seq,
            from: msg.from,
            created_at: msg.created_at,
            head: msg.head,
            content,
        }
    }
}

/// `get data (since, before, limit)`: ascending seq order, soft-deletes
/// for `caller` and tombstones folded into `content: None` placeholders.
pub async fn history(
    store: &dyn Store,
    topic: &str,
    caller: UserId,
    query: SeqQuery,
) -> StoreResult<Vec<VisibleMessage>> {
    let messages = store.get_range(topic, query).await?;
    Ok(messages
        .into_iter()
        .map(|m| VisibleMessage::from((m, caller)))
        .collect())
}

fn edit_count(head: &HeaderMap) -> u32 {
    head.get("edit_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32
}

pub fn can_edit(msg: &Message, sender: UserId, now: DateTime<Utc>) -> bool {
    msg.from == sender
        && !msg.tombstoned
        && now.signed_duration_since(msg.created_at) <= EDIT_WINDOW
        && edit_count(&msg.head) < MAX_EDITS
}

pub fn can_unsend(msg: &Message, sender: UserId, now: DateTime<Utc>) -> bool {
    msg.from == sender
        && !msg.tombstoned
        && now.signed_duration_since(msg.created_at) <= UNSEND_WINDOW
}

/// Apply an edit: bumps `edit_count`, stamps `edited_at`, replaces content.
/// No new seq is allocated. Caller must have already checked `can_edit`.
pub async fn apply_edit(
    store: &dyn Store,
    topic: &str,
    msg: &Message,
    new_content: serde_json::Value,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let mut delta = HeaderMap::new();
    delta.insert("edited_at".to_owned(), serde_json::json!(now.to_rfc3339()));
    delta.insert("edit_count".to_owned(), serde_json::json!(edit_count(&msg.head) + 1));
    store
        .update_header(topic, msg.seq, delta, Some(new_content))
        .await
}

/// Apply an unsend: nulls content, marks `unsent`. No new seq allocated.
pub async fn apply_unsend(store: &dyn Store, topic: &str, msg: &Message) -> StoreResult<()> {
    let mut delta = HeaderMap::new();
    delta.insert("unsent".to_owned(), serde_json::json!(true));
    store.update_header(topic, msg.seq, delta, Some(serde_json::Value::Null)).await
}

/// Toggle the caller's id in `head.reactions[token]`. Returns whether the
/// reaction is now present (`true`) or was just removed (`false`).
pub async fn toggle_reaction(
    store: &dyn Store,
    topic: &str,
    msg: &Message,
    actor: UserId,
    token: &str,
) -> StoreResult<bool> {
    let mut reactions: std::collections::HashMap<String, Vec<UserId>> = msg
        .head
        .get("reactions")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let entry = reactions.entry(token.to_owned()).or_default();
    let now_present = if let Some(pos) = entry.iter().position(|&u| u == actor) {
        entry.remove(pos);
        false
    } else {
        entry.push(actor);
        true
    };
    let mut delta = HeaderMap::new();
    delta.insert("reactions".to_owned(), serde_json::to_value(&reactions).map_err(|_| StoreError::Internal)?);
    store.update_header(topic, msg.seq, delta, None).await?;
    Ok(now_present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_persistence::{MemoryStore, Topic, TopicKind, TopicStore};

    fn sample_msg(from: UserId, created_at: DateTime<Utc>) -> Message {
        Message {
            topic: "grpX".to_owned(),
            seq: 1,
            from,
            created_at,
            head: HeaderMap::new(),
            content: Some(serde_json::json!("hi")),
            deleted_for: Vec::new(),
            tombstoned: false,
        }
    }

    #[test]
    fn edit_window_and_count_enforced() {
        let now = Utc::now();
        let msg = sample_msg(1, now - Duration::minutes(10));
        assert!(can_edit(&msg, 1, now));
        assert!(!can_edit(&msg, 2, now));
        let stale = sample_msg(1, now - Duration::minutes(16));
        assert!(!can_edit(&stale, 1, now));
    }

    #[test]
    fn unsend_window_enforced() {
        let now = Utc::now();
        let msg = sample_msg(1, now - Duration::minutes(5));
        assert!(can_unsend(&msg, 1, now));
        let stale = sample_msg(1, now - Duration::minutes(11));
        assert!(!can_unsend(&stale, 1, now));
    }

    #[tokio::test]
    async fn publish_then_history_round_trips() {
        let store = MemoryStore::new();
        TopicStore::create(&store, Topic::new("grpX", TopicKind::Grp, Utc::now()))
            .await
            .unwrap();
        let seq = publish(&store, "grpX", 1, HeaderMap::new(), serde_json::json!("hello"), Utc::now())
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let visible = history(&store, "grpX", 1, SeqQuery::default()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, Some(serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn toggle_reaction_adds_then_removes() {
        let store = MemoryStore::new();
        TopicStore::create(&store, Topic::new("grpX", TopicKind::Grp, Utc::now()))
            .await
            .unwrap();
        publish(&store, "grpX", 1, HeaderMap::new(), serde_json::json!("hi"), Utc::now())
            .await
            .unwrap();
        let msg = store.get_one("grpX", 1).await.unwrap();
        assert!(toggle_reaction(&store, "grpX", &msg, 9, "heart").await.unwrap());
        let msg = store.get_one("grpX", 1).await.unwrap();
        assert!(!toggle_reaction(&store, "grpX", &msg, 9, "heart").await.unwrap());
    }
}
