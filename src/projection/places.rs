use crate::domain::{Event, EventKind, Place, PlaceId, RoomId};

use super::{Projection, Source, State};

/// Places of a room, from `places/created|deleted|restored`.
#[derive(Debug)]
pub struct PlacesProjection;

impl Projection for PlacesProjection {
    const NAME: &'static str = "place";
    const KINDS: &'static [EventKind] = &[
        EventKind::PlaceCreated,
        EventKind::PlaceDeleted,
        EventKind::PlaceRestored,
    ];

    type Scope = RoomId;
    type Key = PlaceId;
    type Entity = Place;

    fn source(scope: &RoomId) -> Source<'_> {
        Source::Group(*scope)
    }

    fn scope_of(event: &Event) -> RoomId {
        event.group_id
    }

    fn key_of(event: &Event) -> Option<PlaceId> {
        event.place_id
    }

    fn apply(state: &mut State<Self>, event: &Event) {
        match event.kind {
            EventKind::PlaceCreated => created(state, event),
            EventKind::PlaceDeleted => set_deleted(state, event, true),
            EventKind::PlaceRestored => set_deleted(state, event, false),
            EventKind::RollCreated
            | EventKind::BoostCreated
            | EventKind::RoomCreated
            | EventKind::RoomJoined
            | EventKind::RoomLeft => {}
        }
    }
}

fn created(state: &mut State<PlacesProjection>, event: &Event) {
    let Some(id) = event.place_id else {
        return;
    };
    state.insert(
        id,
        Place {
            id,
            name: event.payload.clone(),
            creator_id: event.actor_id.clone(),
            created_at: event.timestamp,
            room_id: event.group_id,
            is_deleted: false,
        },
    );
}

fn set_deleted(state: &mut State<PlacesProjection>, event: &Event, deleted: bool) {
    if let Some(place) = event.place_id.and_then(|id| state.get_mut(&id)) {
        place.is_deleted = deleted;
    }
}
