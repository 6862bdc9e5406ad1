use crate::repo::PgStore;
use async_trait::async_trait;
use chat_persistence::{HeaderMap, Message, MessageStore, SeqQuery, StoreError, StoreResult, UserId};
use sqlx::Row;

fn row_to_message(row: sqlx::postgres::PgRow) -> StoreResult<Message> {
    let from: i64 = row.try_get("from_user").map_err(|_| StoreError::Internal)?;
    let deleted_for: Vec<i64> = row.try_get("deleted_for").map_err(|_| StoreError::Internal)?;
    let head: serde_json::Value = row.try_get("head").map_err(|_| StoreError::Internal)?;
    let head: HeaderMap = serde_json::from_value(head).map_err(|_| StoreError::Internal)?;
    Ok(Message {
        topic: row.try_get("topic").map_err(|_| StoreError::Internal)?,
        seq: row.try_get("seq").map_err(|_| StoreError::Internal)?,
        from: from as UserId,
        created_at: row.try_get("created_at").map_err(|_| StoreError::Internal)?,
        head,
        content: row.try_get("content").map_err(|_| StoreError::Internal)?,
        deleted_for: deleted_for.into_iter().map(|id| id as UserId).collect(),
        tombstoned: row.try_get("tombstoned").map_err(|_| StoreError::Internal)?,
    })
}

fn map_err(err: sqlx::Error) -> StoreError {
    tracing::warn!(error = %err, "persistence error");
    StoreError::Internal
}

#[async_trait]
impl MessageStore for PgStore {
    /// Allocates `seq` and inserts the message inside one transaction: the
    /// `UPDATE ... RETURNING` on `topics.last_seq` takes the row lock that
    /// serializes concurrent publishers on the same topic, so the insert
    /// below always sees the seq it was just handed. A failure at either
    /// step rolls the whole transaction back, leaving `last_seq` untouched.
    async fn save(&self, mut msg: Message) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let row = sqlx::query("UPDATE topics SET last_seq = last_seq + 1, touched_at = $2 WHERE name = $1 RETURNING last_seq")
            .bind(&msg.topic)
            .bind(msg.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?
            .ok_or(StoreError::NotFound)?;
        let seq: i64 = row.try_get("last_seq").map_err(|_| StoreError::Internal)?;
        msg.seq = seq;

        let head_json = serde_json::to_value(&msg.head).map_err(|_| StoreError::Internal)?;
        sqlx::query(
            r#"INSERT INTO messages (topic, seq, from_user, created_at, head, content, deleted_for, tombstoned)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&msg.topic)
        .bind(seq)
        .bind(msg.from as i64)
        .bind(msg.created_at)
        .bind(head_json)
        .bind(&msg.content)
        .bind(msg.deleted_for.iter().map(|id| *id as i64).collect::<Vec<i64>>())
        .bind(msg.tombstoned)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(seq)
    }

    async fn get_range(&self, topic: &str, query: SeqQuery) -> StoreResult<Vec<Message>> {
        let since = query.since.unwrap_or(1);
        let before = query.before.unwrap_or(i64::MAX);
        let limit = i64::from(if query.limit == 0 { u32::MAX } else { query.limit }).min(10_000);
        let rows = sqlx::query(
            r#"SELECT topic, seq, from_user, created_at, head, content, deleted_for, tombstoned
               FROM messages
               WHERE topic = $1 AND seq >= $2 AND seq < $3
               ORDER BY seq ASC
               LIMIT $4"#,
        )
        .bind(topic)
        .bind(since)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(row_to_message).collect()
    }

    async fn get_one(&self, topic: &str, seq: i64) -> StoreResult<Message> {
        let row = sqlx::query(
            r#"SELECT topic, seq, from_user, created_at, head, content, deleted_for, tombstoned
               FROM messages WHERE topic = $1 AND seq = $2"#,
        )
        .bind(topic)
        .bind(seq)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_message(row)
    }

    async fn delete_list(
        &self,
        topic: &str,
        ranges: &[(i64, i64)],
        hard: bool,
        for_user: Option<UserId>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        for (lo, hi) in ranges {
            if hard {
                sqlx::query(
                    r#"UPDATE messages
                       SET content = NULL, tombstoned = true,
                           head = head || '{"deleted": true}'::jsonb
                       WHERE topic = $1 AND seq >= $2 AND seq < $3"#,
                )
                .bind(topic)
                .bind(lo)
                .bind(hi)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            } else {
                let user = for_user.ok_or(StoreError::Internal)?;
                sqlx::query(
                    r#"UPDATE messages
                       SET deleted_for = array_append(deleted_for, $4)
                       WHERE topic = $1 AND seq >= $2 AND seq < $3
                         AND NOT ($4 = ANY(deleted_for))"#,
                )
                .bind(topic)
                .bind(lo)
                .bind(hi)
                .bind(user as i64)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            }
        }
        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn update_header(
        &self,
        topic: &str,
        seq: i64,
        header_delta: HeaderMap,
        content: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let delta_json = serde_json::to_value(&header_delta).map_err(|_| StoreError::Internal)?;
        let result = if let Some(content) = content {
            sqlx::query(
                r#"UPDATE messages SET head = head || $3, content = $4
                   WHERE topic = $1 AND seq = $2"#,
            )
            .bind(topic)
            .bind(seq)
            .bind(delta_json)
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
        } else {
            sqlx::query(
                r#"UPDATE messages SET head = head || $3
                   WHERE topic = $1 AND seq = $2"#,
            )
            .bind(topic)
            .bind(seq)
            .bind(delta_json)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
