use crate::repo::PgStore;
use async_trait::async_trait;
use chat_persistence::{DeletedRange, StoreError, StoreResult, Subscription, SubscriptionStore, UserId};
use chat_proto::AccessMode;
use sqlx::Row;
use std::str::FromStr;

fn ranges_to_json(ranges: &[DeletedRange]) -> serde_json::Value {
    serde_json::Value::Array(
        ranges
            .iter()
            .map(|r| serde_json::json!({ "low": r.low, "hi": r.hi }))
            .collect(),
    )
}

fn ranges_from_json(value: serde_json::Value) -> StoreResult<Vec<DeletedRange>> {
    let arr = value.as_array().ok_or(StoreError::Internal)?;
    arr.iter()
        .map(|entry| {
            let low = entry.get("low").and_then(serde_json::Value::as_i64).ok_or(StoreError::Internal)?;
            let hi = entry.get("hi").and_then(serde_json::Value::as_i64).ok_or(StoreError::Internal)?;
            Ok(DeletedRange { low, hi })
        })
        .collect()
}

fn row_to_subscription(row: sqlx::postgres::PgRow) -> StoreResult<Subscription> {
    let user_id: i64 = row.try_get("user_id").map_err(|_| StoreError::Internal)?;
    let want: String = row.try_get("mode_want").map_err(|_| StoreError::Internal)?;
    let given: String = row.try_get("mode_given").map_err(|_| StoreError::Internal)?;
    let ranges: serde_json::Value = row.try_get("deleted_ranges").map_err(|_| StoreError::Internal)?;
    Ok(Subscription {
        topic: row.try_get("topic").map_err(|_| StoreError::Internal)?,
        user: user_id as UserId,
        mode_want: AccessMode::from_str(&want).map_err(|_| StoreError::Internal)?,
        mode_given: AccessMode::from_str(&given).map_err(|_| StoreError::Internal)?,
        read_seq: row.try_get("read_seq").map_err(|_| StoreError::Internal)?,
        recv_seq: row.try_get("recv_seq").map_err(|_| StoreError::Internal)?,
        deleted_ranges: ranges_from_json(ranges)?,
        private: row.try_get("private").map_err(|_| StoreError::Internal)?,
        created_at: row.try_get("created_at").map_err(|_| StoreError::Internal)?,
        updated_at: row.try_get("updated_at").map_err(|_| StoreError::Internal)?,
    })
}

fn map_err(err: sqlx::Error) -> StoreError {
    tracing::warn!(error = %err, "persistence error");
    StoreError::Internal
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn upsert(&self, sub: Subscription) -> StoreResult<Subscription> {
        let row = sqlx::query(
            r#"INSERT INTO subscriptions
                   (topic, user_id, mode_want, mode_given, read_seq, recv_seq, deleted_ranges, private)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (topic, user_id) DO UPDATE SET
                   mode_want = EXCLUDED.mode_want,
                   mode_given = EXCLUDED.mode_given,
                   read_seq = EXCLUDED.read_seq,
                   recv_seq = EXCLUDED.recv_seq,
                   deleted_ranges = EXCLUDED.deleted_ranges,
                   private = EXCLUDED.private,
                   updated_at = now()
               RETURNING topic, user_id, mode_want, mode_given, read_seq, recv_seq,
                         deleted_ranges, private, created_at, updated_at"#,
        )
        .bind(&sub.topic)
        .bind(sub.user as i64)
        .bind(sub.mode_want.to_letters())
        .bind(sub.mode_given.to_letters())
        .bind(sub.read_seq)
        .bind(sub.recv_seq)
        .bind(ranges_to_json(&sub.deleted_ranges))
        .bind(&sub.private)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        row_to_subscription(row)
    }

    async fn get_for_user(&self, user: UserId) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"SELECT topic, user_id, mode_want, mode_given, read_seq, recv_seq,
                      deleted_ranges, private, created_at, updated_at
               FROM subscriptions WHERE user_id = $1"#,
        )
        .bind(user as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(row_to_subscription).collect()
    }

    async fn get_for_topic(&self, topic: &str) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"SELECT topic, user_id, mode_want, mode_given, read_seq, recv_seq,
                      deleted_ranges, private, created_at, updated_at
               FROM subscriptions WHERE topic = $1"#,
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(row_to_subscription).collect()
    }

    async fn get(&self, topic: &str, user: UserId) -> StoreResult<Subscription> {
        let row = sqlx::query(
            r#"SELECT topic, user_id, mode_want, mode_given, read_seq, recv_seq,
                      deleted_ranges, private, created_at, updated_at
               FROM subscriptions WHERE topic = $1 AND user_id = $2"#,
        )
        .bind(topic)
        .bind(user as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_subscription(row)
    }

    async fn delete(&self, topic: &str, user: UserId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE topic = $1 AND user_id = $2")
            .bind(topic)
            .bind(user as i64)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
