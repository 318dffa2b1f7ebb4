//! PostgreSQL implementation of the event log.

use async_trait::async_trait;
use sqlx::PgPool;

use super::EventLog;
use super::models::{StoredEvent, encode_timestamp};
use crate::domain::{Event, EventKind, RoomId, UserId};
use crate::error::BackendError;

const SELECT_COLUMNS: &str =
    "SELECT seq, event_id, actor_id, group_id, kind, occurred_at_ns, place_id, payload FROM lunch_events";

/// PostgreSQL-backed event log using `sqlx::PgPool`.
///
/// Rows are append-only; `seq` preserves insertion order so that events
/// sharing a timestamp replay in the order they were written.
#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new event log over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the events table and its lookup indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError::Database`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lunch_events (\
                seq BIGSERIAL PRIMARY KEY, \
                event_id UUID NOT NULL UNIQUE, \
                actor_id TEXT NOT NULL, \
                group_id UUID NOT NULL, \
                kind TEXT NOT NULL, \
                occurred_at_ns BIGINT NOT NULL, \
                place_id UUID NULL, \
                payload TEXT NOT NULL DEFAULT '')",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS lunch_events_group_idx ON lunch_events (group_id, occurred_at_ns)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS lunch_events_actor_idx ON lunch_events (actor_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch(
        &self,
        filter: &str,
        bind: Key<'_>,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError> {
        let kind_names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let sql = if kind_names.is_empty() {
            format!("{SELECT_COLUMNS} WHERE {filter} ORDER BY seq ASC")
        } else {
            format!("{SELECT_COLUMNS} WHERE {filter} AND kind = ANY($2) ORDER BY seq ASC")
        };
        let query = sqlx::query_as::<_, StoredEvent>(&sql);
        let query = match bind {
            Key::Group(group_id) => query.bind(*group_id.as_uuid()),
            Key::Actor(actor_id) => query.bind(actor_id.as_str().to_string()),
        };
        let query = if kind_names.is_empty() {
            query
        } else {
            query.bind(kind_names)
        };
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredEvent::into_event).collect()
    }
}

enum Key<'a> {
    Group(RoomId),
    Actor(&'a UserId),
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn append(&self, event: &Event) -> Result<(), BackendError> {
        sqlx::query(
            "INSERT INTO lunch_events \
             (event_id, actor_id, group_id, kind, occurred_at_ns, place_id, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*event.id.as_uuid())
        .bind(event.actor_id.as_str())
        .bind(*event.group_id.as_uuid())
        .bind(event.kind.as_str())
        .bind(encode_timestamp(event.timestamp)?)
        .bind(event.place_id.map(|id| *id.as_uuid()))
        .bind(event.payload.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn by_group(
        &self,
        group_id: RoomId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError> {
        self.fetch("group_id = $1", Key::Group(group_id), kinds).await
    }

    async fn by_actor(
        &self,
        actor_id: &UserId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError> {
        self.fetch("actor_id = $1", Key::Actor(actor_id), kinds).await
    }
}
