use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::domain::{Event, EventKind, Room, RoomId, UserId};

use super::{Projection, Source, State};

/// A room a user currently belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// The room.
    pub room_id: RoomId,
    /// When the user last created or joined it.
    pub since: DateTime<Utc>,
}

/// Rooms keyed by id, from `rooms/created|joined|left` of that room.
#[derive(Debug)]
pub struct RoomsProjection;

/// The rooms one user belongs to, from that user's `rooms/*` events.
#[derive(Debug)]
pub struct MembershipsProjection;

const ROOM_KINDS: &[EventKind] = &[
    EventKind::RoomCreated,
    EventKind::RoomJoined,
    EventKind::RoomLeft,
];

impl Projection for RoomsProjection {
    const NAME: &'static str = "room";
    const KINDS: &'static [EventKind] = ROOM_KINDS;

    type Scope = RoomId;
    type Key = RoomId;
    type Entity = Room;

    fn source(scope: &RoomId) -> Source<'_> {
        Source::Group(*scope)
    }

    fn scope_of(event: &Event) -> RoomId {
        event.group_id
    }

    fn key_of(event: &Event) -> Option<RoomId> {
        Some(event.group_id)
    }

    fn apply(state: &mut State<Self>, event: &Event) {
        match event.kind {
            EventKind::RoomCreated => {
                state.insert(
                    event.group_id,
                    Room {
                        id: event.group_id,
                        name: event.payload.clone(),
                        owner_id: event.actor_id.clone(),
                        created_at: event.timestamp,
                        member_ids: BTreeSet::from([event.actor_id.clone()]),
                    },
                );
            }
            EventKind::RoomJoined => {
                if let Some(room) = state.get_mut(&event.group_id) {
                    room.member_ids.insert(event.actor_id.clone());
                }
            }
            EventKind::RoomLeft => {
                if let Some(room) = state.get_mut(&event.group_id) {
                    room.member_ids.remove(&event.actor_id);
                }
            }
            EventKind::PlaceCreated
            | EventKind::PlaceDeleted
            | EventKind::PlaceRestored
            | EventKind::RollCreated
            | EventKind::BoostCreated => {}
        }
    }
}

impl Projection for MembershipsProjection {
    const NAME: &'static str = "membership";
    const KINDS: &'static [EventKind] = ROOM_KINDS;

    type Scope = UserId;
    type Key = RoomId;
    type Entity = Membership;

    fn source(scope: &UserId) -> Source<'_> {
        Source::Actor(scope)
    }

    fn scope_of(event: &Event) -> UserId {
        event.actor_id.clone()
    }

    fn key_of(event: &Event) -> Option<RoomId> {
        Some(event.group_id)
    }

    fn apply(state: &mut State<Self>, event: &Event) {
        match event.kind {
            EventKind::RoomCreated | EventKind::RoomJoined => {
                state.insert(
                    event.group_id,
                    Membership {
                        room_id: event.group_id,
                        since: event.timestamp,
                    },
                );
            }
            EventKind::RoomLeft => {
                state.remove(&event.group_id);
            }
            EventKind::PlaceCreated
            | EventKind::PlaceDeleted
            | EventKind::PlaceRestored
            | EventKind::RollCreated
            | EventKind::BoostCreated => {}
        }
    }
}
