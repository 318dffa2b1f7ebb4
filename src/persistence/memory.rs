//! In-memory event log.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::EventLog;
use crate::domain::{Event, EventKind, RoomId, UserId};
use crate::error::BackendError;

/// Event log kept in process memory, in append order.
///
/// Suitable for tests and for deployments that accept losing history on
/// restart.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log pre-filled with `events`, kept in the given order.
    #[must_use]
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    /// Returns a copy of every event in append order.
    pub async fn snapshot(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// Returns the number of stored events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns `true` if nothing has been appended yet.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn filtered(&self, keep: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| keep(event))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: &Event) -> Result<(), BackendError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn by_group(
        &self,
        group_id: RoomId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError> {
        Ok(self
            .filtered(|event| event.group_id == group_id && event.matches_kinds(kinds))
            .await)
    }

    async fn by_actor(
        &self,
        actor_id: &UserId,
        kinds: &[EventKind],
    ) -> Result<Vec<Event>, BackendError> {
        Ok(self
            .filtered(|event| &event.actor_id == actor_id && event.matches_kinds(kinds))
            .await)
    }
}
