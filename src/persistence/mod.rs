//! Persistence layer: the append-only event log.
//!
//! [`EventLog`] is the only durable store the engine talks to. Two
//! backends ship with the crate: [`InMemoryEventLog`] for tests and
//! single-process deployments, and [`PostgresEventLog`] backed by
//! `sqlx::PgPool`. Use [`connect`] to pick one from [`EngineConfig`].

pub mod memory;
pub mod models;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use crate::config::{EngineConfig, EventLogBackend};
use crate::domain::{Event, EventKind, RoomId, UserId};
use crate::error::{BackendError, LunchError};

pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;

/// Append-only, per-group storage of typed events.
///
/// Implementations must support concurrent appends and must never drop an
/// event silently. Lookups return matching events in no particular order;
/// callers sort. A `kinds` filter is an allow-list, empty means every kind.
#[async_trait]
pub trait EventLog: Send + Sync + std::fmt::Debug {
    /// Persists one event.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the event could not be stored.
    async fn append(&self, event: &Event) -> Result<(), BackendError>;

    /// Returns every event owned by `group_id` whose kind passes `kinds`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on storage failure.
    async fn by_group(
        &self,
        group_id: RoomId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError>;

    /// Returns every event caused by `actor_id` whose kind passes `kinds`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on storage failure.
    async fn by_actor(
        &self,
        actor_id: &UserId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError>;
}

/// Builds the event log selected by `config`.
///
/// For PostgreSQL this opens the connection pool and makes sure the events
/// table exists.
///
/// # Errors
///
/// Returns [`LunchError::Backend`] if the database cannot be reached or the
/// schema cannot be created.
pub async fn connect(config: &EngineConfig) -> Result<Arc<dyn EventLog>, LunchError> {
    match config.event_log_backend {
        EventLogBackend::Memory => {
            tracing::info!("using in-memory event log");
            Ok(Arc::new(InMemoryEventLog::new()))
        }
        EventLogBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .min_connections(config.database_min_connections)
                .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
                .connect(&config.database_url)
                .await
                .map_err(|e| LunchError::backend("connect event log", e.into()))?;
            let log = PostgresEventLog::new(pool);
            log.ensure_schema()
                .await
                .map_err(|e| LunchError::backend("create event log schema", e))?;
            tracing::info!("using postgres event log");
            Ok(Arc::new(log))
        }
    }
}
