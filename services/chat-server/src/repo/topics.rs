use crate::repo::PgStore;
use async_trait::async_trait;
use chat_persistence::{StoreError, StoreResult, Topic, TopicKind, TopicStore, UserId};
use chat_proto::AccessMode;
use sqlx::Row;
use std::str::FromStr;

fn kind_to_text(kind: TopicKind) -> &'static str {
    match kind {
        TopicKind::Me => "me",
        TopicKind::Fnd => "fnd",
        TopicKind::P2p => "p2p",
        TopicKind::Grp => "grp",
    }
}

fn kind_from_text(text: &str) -> StoreResult<TopicKind> {
    match text {
        "me" => Ok(TopicKind::Me),
        "fnd" => Ok(TopicKind::Fnd),
        "p2p" => Ok(TopicKind::P2p),
        "grp" => Ok(TopicKind::Grp),
        _ => Err(StoreError::Internal),
    }
}

fn row_to_topic(row: sqlx::postgres::PgRow) -> StoreResult<Topic> {
    let kind: String = row.try_get("kind").map_err(|_| StoreError::Internal)?;
    let auth: String = row.try_get("default_access_auth").map_err(|_| StoreError::Internal)?;
    let anon: String = row.try_get("default_access_anon").map_err(|_| StoreError::Internal)?;
    let owner: Option<i64> = row.try_get("owner").map_err(|_| StoreError::Internal)?;
    Ok(Topic {
        name: row.try_get("name").map_err(|_| StoreError::Internal)?,
        kind: kind_from_text(&kind)?,
        owner: owner.map(|o| o as UserId),
        public: row.try_get("public").map_err(|_| StoreError::Internal)?,
        default_access_auth: AccessMode::from_str(&auth).map_err(|_| StoreError::Internal)?,
        default_access_anon: AccessMode::from_str(&anon).map_err(|_| StoreError::Internal)?,
        last_seq: row.try_get("last_seq").map_err(|_| StoreError::Internal)?,
        clear_id: row.try_get("clear_id").map_err(|_| StoreError::Internal)?,
        created_at: row.try_get("created_at").map_err(|_| StoreError::Internal)?,
        updated_at: row.try_get("updated_at").map_err(|_| StoreError::Internal)?,
        touched_at: row.try_get("touched_at").map_err(|_| StoreError::Internal)?,
    })
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return StoreError::Duplicate;
        }
    }
    tracing::warn!(error = %err, "persistence error");
    StoreError::Internal
}

#[async_trait]
impl TopicStore for PgStore {
    async fn create(&self, topic: Topic) -> StoreResult<Topic> {
        let row = sqlx::query(
            r#"INSERT INTO topics (name, kind, owner, public, default_access_auth, default_access_anon, last_seq, clear_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING name, kind, owner, public, default_access_auth, default_access_anon,
                         last_seq, clear_id, created_at, updated_at, touched_at"#,
        )
        .bind(&topic.name)
        .bind(kind_to_text(topic.kind))
        .bind(topic.owner.map(|o| o as i64))
        .bind(&topic.public)
        .bind(topic.default_access_auth.to_letters())
        .bind(topic.default_access_anon.to_letters())
        .bind(topic.last_seq)
        .bind(topic.clear_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        row_to_topic(row)
    }

    async fn get(&self, name: &str) -> StoreResult<Topic> {
        let row = sqlx::query(
            r#"SELECT name, kind, owner, public, default_access_auth, default_access_anon,
                      last_seq, clear_id, created_at, updated_at, touched_at
               FROM topics WHERE name = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_topic(row)
    }

    async fn update(&self, topic: Topic) -> StoreResult<Topic> {
        let row = sqlx::query(
            r#"UPDATE topics
               SET public = $2, default_access_auth = $3, default_access_anon = $4,
                   last_seq = $5, clear_id = $6, updated_at = now(), touched_at = now()
               WHERE name = $1
               RETURNING name, kind, owner, public, default_access_auth, default_access_anon,
                         last_seq, clear_id, created_at, updated_at, touched_at"#,
        )
        .bind(&topic.name)
        .bind(&topic.public)
        .bind(topic.default_access_auth.to_letters())
        .bind(topic.default_access_anon.to_letters())
        .bind(topic.last_seq)
        .bind(topic.clear_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_topic(row)
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM topics WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn owner_change(&self, name: &str, new_owner: UserId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE topics SET owner = $2, updated_at = now() WHERE name = $1")
            .bind(name)
            .bind(new_owner as i64)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
