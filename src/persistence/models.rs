//! Database row model for stored events.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Event, EventId, PlaceId, RoomId, UserId};
use crate::error::BackendError;

/// A stored event row from the `lunch_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEvent {
    /// Auto-increment row ID; defines log order.
    pub seq: i64,
    /// Event identifier.
    pub event_id: Uuid,
    /// Acting user.
    pub actor_id: String,
    /// Owning room.
    pub group_id: Uuid,
    /// Event kind wire name (e.g. `"rolls/created"`).
    pub kind: String,
    /// Nanoseconds since the Unix epoch.
    pub occurred_at_ns: i64,
    /// Subject place, if any.
    pub place_id: Option<Uuid>,
    /// Free-text payload.
    pub payload: String,
}

impl StoredEvent {
    /// Decodes the row into a domain [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Corrupt`] if the kind name is unknown.
    pub fn into_event(self) -> Result<Event, BackendError> {
        let kind = self
            .kind
            .parse()
            .map_err(|e| BackendError::Corrupt(format!("row {}: {e}", self.seq)))?;
        Ok(Event {
            id: EventId::from_uuid(self.event_id),
            actor_id: UserId::new(self.actor_id),
            group_id: RoomId::from_uuid(self.group_id),
            kind,
            timestamp: DateTime::<Utc>::from_timestamp_nanos(self.occurred_at_ns),
            place_id: self.place_id.map(PlaceId::from_uuid),
            payload: self.payload,
        })
    }
}

/// Encodes a timestamp as nanoseconds since the Unix epoch.
///
/// # Errors
///
/// Returns [`BackendError::Corrupt`] for timestamps outside the range
/// representable in an `i64` of nanoseconds (years 1677..2262).
pub fn encode_timestamp(at: DateTime<Utc>) -> Result<i64, BackendError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| BackendError::Corrupt(format!("timestamp out of range: {at}")))
}
