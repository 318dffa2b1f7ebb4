//! Roll and boost entities.
//!
//! Both are append-only: materialized from a single `*/created` event and
//! never retracted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{EventId, PlaceId, RoomId, UserId};

/// Outcome of one lottery draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Roll {
    /// Id of the event that recorded the roll.
    pub id: EventId,
    /// User who triggered the draw.
    pub user_id: UserId,
    /// Place the lottery picked.
    pub place_id: PlaceId,
    /// Owning room.
    pub room_id: RoomId,
    /// Draw timestamp.
    pub time: DateTime<Utc>,
}

/// A spend of weekly quota that multiplies a place's weight until the next
/// roll in its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boost {
    /// Id of the event that recorded the boost.
    pub id: EventId,
    /// User who spent the point.
    pub user_id: UserId,
    /// Boosted place.
    pub place_id: PlaceId,
    /// Owning room.
    pub room_id: RoomId,
    /// Boost timestamp.
    pub time: DateTime<Utc>,
}
