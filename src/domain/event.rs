//! The durable record: immutable domain events.
//!
//! An [`Event`] is the only thing the engine ever persists. Every entity
//! (place, roll, boost, room) is rebuilt by replaying events of the kinds
//! it understands, see [`crate::projection`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, PlaceId, RoomId, UserId};

/// Closed set of event kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A place was added to a room.
    #[serde(rename = "places/created")]
    PlaceCreated,
    /// A place was soft-deleted.
    #[serde(rename = "places/deleted")]
    PlaceDeleted,
    /// A soft-deleted place was restored.
    #[serde(rename = "places/restored")]
    PlaceRestored,
    /// A lottery draw picked a place.
    #[serde(rename = "rolls/created")]
    RollCreated,
    /// A user boosted a place until the next roll.
    #[serde(rename = "boosts/created")]
    BoostCreated,
    /// A room was created; the creator becomes its first member.
    #[serde(rename = "rooms/created")]
    RoomCreated,
    /// A user joined a room.
    #[serde(rename = "rooms/joined")]
    RoomJoined,
    /// A user left a room.
    #[serde(rename = "rooms/left")]
    RoomLeft,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::PlaceCreated,
        Self::PlaceDeleted,
        Self::PlaceRestored,
        Self::RollCreated,
        Self::BoostCreated,
        Self::RoomCreated,
        Self::RoomJoined,
        Self::RoomLeft,
    ];

    /// Returns the stable wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlaceCreated => "places/created",
            Self::PlaceDeleted => "places/deleted",
            Self::PlaceRestored => "places/restored",
            Self::RollCreated => "rolls/created",
            Self::BoostCreated => "boosts/created",
            Self::RoomCreated => "rooms/created",
            Self::RoomJoined => "rooms/joined",
            Self::RoomLeft => "rooms/left",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Immutable fact appended to the event log.
///
/// `(group_id, timestamp)` is the de-facto sort key. Concurrent writers
/// may append slightly out of timestamp order, so consumers sort before
/// interpreting transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// User who caused the event.
    pub actor_id: UserId,
    /// Room that owns the event.
    pub group_id: RoomId,
    /// What happened.
    pub kind: EventKind,
    /// When it happened (nanosecond precision).
    pub timestamp: DateTime<Utc>,
    /// Place the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<PlaceId>,
    /// Free-text payload, e.g. a name at creation time.
    #[serde(default)]
    pub payload: String,
}

impl Event {
    /// Creates an event with a fresh id and an empty payload.
    #[must_use]
    pub fn new(
        kind: EventKind,
        actor_id: UserId,
        group_id: RoomId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            actor_id,
            group_id,
            kind,
            timestamp,
            place_id: None,
            payload: String::new(),
        }
    }

    /// Sets the subject place.
    #[must_use]
    pub fn with_place(mut self, place_id: PlaceId) -> Self {
        self.place_id = Some(place_id);
        self
    }

    /// Sets the free-text payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns `true` if the event passes a kind allow-list.
    ///
    /// An empty allow-list admits every kind.
    #[must_use]
    pub fn matches_kinds(&self, kinds: &[EventKind]) -> bool {
        kinds.is_empty() || kinds.contains(&self.kind)
    }
}

/// Stable sort by timestamp; ties keep their log order.
pub fn sort_by_time(events: &mut [Event]) {
    events.sort_by_key(|event| event.timestamp);
}
