//! Lunch place entity.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{PlaceId, RoomId, UserId};

/// A place materialized from `places/*` events.
///
/// Created once, then toggled between deleted and restored any number of
/// times. Never physically removed from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Place {
    /// Place identifier.
    pub id: PlaceId,
    /// Display name given at creation.
    pub name: String,
    /// User who added the place.
    pub creator_id: UserId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Owning room.
    pub room_id: RoomId,
    /// Soft-delete flag.
    #[serde(skip)]
    pub is_deleted: bool,
}
