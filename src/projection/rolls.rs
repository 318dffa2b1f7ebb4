use crate::domain::{Boost, Event, EventId, EventKind, Roll, RoomId};

use super::{Projection, Source, State};

/// Rolls of a room, from `rolls/created`. Append-only.
#[derive(Debug)]
pub struct RollsProjection;

/// Boosts of a room, from `boosts/created`. Append-only.
#[derive(Debug)]
pub struct BoostsProjection;

impl Projection for RollsProjection {
    const NAME: &'static str = "roll";
    const KINDS: &'static [EventKind] = &[EventKind::RollCreated];

    type Scope = RoomId;
    type Key = EventId;
    type Entity = Roll;

    fn source(scope: &RoomId) -> Source<'_> {
        Source::Group(*scope)
    }

    fn scope_of(event: &Event) -> RoomId {
        event.group_id
    }

    fn key_of(event: &Event) -> Option<EventId> {
        Some(event.id)
    }

    fn apply(state: &mut State<Self>, event: &Event) {
        match event.kind {
            EventKind::RollCreated => {
                let Some(place_id) = event.place_id else {
                    return;
                };
                state.insert(
                    event.id,
                    Roll {
                        id: event.id,
                        user_id: event.actor_id.clone(),
                        place_id,
                        room_id: event.group_id,
                        time: event.timestamp,
                    },
                );
            }
            EventKind::PlaceCreated
            | EventKind::PlaceDeleted
            | EventKind::PlaceRestored
            | EventKind::BoostCreated
            | EventKind::RoomCreated
            | EventKind::RoomJoined
            | EventKind::RoomLeft => {}
        }
    }
}

impl Projection for BoostsProjection {
    const NAME: &'static str = "boost";
    const KINDS: &'static [EventKind] = &[EventKind::BoostCreated];

    type Scope = RoomId;
    type Key = EventId;
    type Entity = Boost;

    fn source(scope: &RoomId) -> Source<'_> {
        Source::Group(*scope)
    }

    fn scope_of(event: &Event) -> RoomId {
        event.group_id
    }

    fn key_of(event: &Event) -> Option<EventId> {
        Some(event.id)
    }

    fn apply(state: &mut State<Self>, event: &Event) {
        match event.kind {
            EventKind::BoostCreated => {
                let Some(place_id) = event.place_id else {
                    return;
                };
                state.insert(
                    event.id,
                    Boost {
                        id: event.id,
                        user_id: event.actor_id.clone(),
                        place_id,
                        room_id: event.group_id,
                        time: event.timestamp,
                    },
                );
            }
            EventKind::PlaceCreated
            | EventKind::PlaceDeleted
            | EventKind::PlaceRestored
            | EventKind::RollCreated
            | EventKind::RoomCreated
            | EventKind::RoomJoined
            | EventKind::RoomLeft => {}
        }
    }
}
