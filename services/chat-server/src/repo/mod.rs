//! Postgres-backed implementation of the four `chat-persistence` store
//! traits. Every query goes through the dynamic `sqlx::query()` +
//! `.bind()` + `row.get()` API rather than the compile-time-checked
//! `query!`/`query_as!` macros, since there is no live database here to
//! run `cargo sqlx prepare` against.

pub mod messages;
pub mod subscriptions;
pub mod topics;
pub mod users;

use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
