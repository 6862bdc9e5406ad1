use crate::repo::PgStore;
use async_trait::async_trait;
use chat_persistence::{StoreError, StoreResult, User, UserId, UserStore};
use chat_proto::AccessMode;
use sqlx::Row;
use std::str::FromStr;

fn row_to_user(row: sqlx::postgres::PgRow) -> StoreResult<User> {
    let id: i64 = row.try_get("id").map_err(|_| StoreError::Internal)?;
    let auth: String = row.try_get("default_access_auth").map_err(|_| StoreError::Internal)?;
    let anon: String = row.try_get("default_access_anon").map_err(|_| StoreError::Internal)?;
    Ok(User {
        id: id as UserId,
        default_access_auth: AccessMode::from_str(&auth).map_err(|_| StoreError::Internal)?,
        default_access_anon: AccessMode::from_str(&anon).map_err(|_| StoreError::Internal)?,
        public: row.try_get("public").map_err(|_| StoreError::Internal)?,
        tags: row.try_get("tags").map_err(|_| StoreError::Internal)?,
        cred_hash: row.try_get("cred_hash").map_err(|_| StoreError::Internal)?,
        created_at: row.try_get("created_at").map_err(|_| StoreError::Internal)?,
        updated_at: row.try_get("updated_at").map_err(|_| StoreError::Internal)?,
        deleted_at: row.try_get("deleted_at").map_err(|_| StoreError::Internal)?,
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
impl UserStore for PgStore {
    async fn create(&self, user: User) -> StoreResult<User> {
        let row = sqlx::query(
            r#"INSERT INTO users (default_access_auth, default_access_anon, public, tags, cred_hash)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, default_access_auth, default_access_anon, public, tags, cred_hash,
                         created_at, updated_at, deleted_at"#,
        )
        .bind(user.default_access_auth.to_letters())
        .bind(user.default_access_anon.to_letters())
        .bind(&user.public)
        .bind(&user.tags)
        .bind(&user.cred_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        row_to_user(row)
    }

    async fn get(&self, id: UserId) -> StoreResult<User> {
        let row = sqlx::query(
            r#"SELECT id, default_access_auth, default_access_anon, public, tags, cred_hash,
                      created_at, updated_at, deleted_at
               FROM users WHERE id = $1"#,
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_user(row)
    }

    async fn update(&self, user: User) -> StoreResult<User> {
        let row = sqlx::query(
            r#"UPDATE users
               SET default_access_auth = $2, default_access_anon = $3, public = $4, tags = $5,
                   cred_hash = $6, updated_at = now()
               WHERE id = $1
               RETURNING id, default_access_auth, default_access_anon, public, tags, cred_hash,
                         created_at, updated_at, deleted_at"#,
        )
        .bind(user.id as i64)
        .bind(user.default_access_auth.to_letters())
        .bind(user.default_access_anon.to_letters())
        .bind(&user.public)
        .bind(&user.tags)
        .bind(&user.cred_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)?;
        row_to_user(row)
    }

    async fn delete(&self, id: UserId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            r#"SELECT id, default_access_auth, default_access_anon, public, tags, cred_hash,
                      created_at, updated_at, deleted_at
               FROM users WHERE $1 = ANY(tags)"#,
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(row_to_user).collect()
    }
}
