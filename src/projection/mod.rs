//! Materializer: pure replay of events into current entity state.
//!
//! Each entity kind has a [`Projection`] describing which log index feeds
//! it, which event kinds it reads, and one transition per event kind.
//! [`materialize`] sorts the events by timestamp (stable, so ties keep log
//! order) and folds them left to right.
//!
//! Events are assumed to be causally ordered by the time they were
//! appended. A transition that references an entity not yet created (a
//! delete stamped before its create, say) leaves the state untouched.

mod places;
mod rolls;
mod rooms;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use crate::domain::{Event, EventKind, RoomId, UserId, sort_by_time};

pub use places::PlacesProjection;
pub use rolls::{BoostsProjection, RollsProjection};
pub use rooms::{Membership, MembershipsProjection, RoomsProjection};

/// Materialized state of one scope: entities keyed by id, ordered by key.
pub type State<P> = BTreeMap<<P as Projection>::Key, <P as Projection>::Entity>;

/// Log index a projection is fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source<'a> {
    /// Events owned by a room.
    Group(RoomId),
    /// Events caused by a user.
    Actor(&'a UserId),
}

/// Replay rules for one entity kind.
pub trait Projection: Sized + Send + Sync + 'static {
    /// Entity kind name used in logs and `NotFound` errors.
    const NAME: &'static str;

    /// Event kinds this projection reads; passed to the log as allow-list.
    const KINDS: &'static [EventKind];

    /// Partition of the log one materialized state covers.
    type Scope: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync;

    /// Entity identifier within a scope.
    type Key: Clone + Ord + fmt::Debug + fmt::Display + Send + Sync;

    /// Materialized entity.
    type Entity: Clone + fmt::Debug + Send + Sync;

    /// Which log index holds the events of `scope`.
    fn source(scope: &Self::Scope) -> Source<'_>;

    /// Scope an event belongs to.
    fn scope_of(event: &Event) -> Self::Scope;

    /// Entity an event touches, if any.
    fn key_of(event: &Event) -> Option<Self::Key>;

    /// Applies one event to the running state.
    fn apply(state: &mut State<Self>, event: &Event);

    /// Returns `true` if this projection reads events of `kind`.
    fn reads(kind: EventKind) -> bool {
        Self::KINDS.contains(&kind)
    }
}

/// Rebuilds state from an unordered event list.
///
/// Replaying the same set of events fetched in a different order yields an
/// identical map, as long as events sharing a timestamp keep their
/// relative log order.
#[must_use]
pub fn materialize<P: Projection>(mut events: Vec<Event>) -> State<P> {
    sort_by_time(&mut events);
    fold::<P>(&events)
}

/// Folds events that are already in replay order.
#[must_use]
pub fn fold<P: Projection>(events: &[Event]) -> State<P> {
    let mut state = State::<P>::new();
    for event in events {
        if P::reads(event.kind) {
            P::apply(&mut state, event);
        }
    }
    state
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::domain::{Event, EventKind, PlaceId, RoomId, UserId};

    /// Monday 2021-09-06 09:00 UTC.
    pub fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 9, 6, 9, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn at(minutes: i64) -> DateTime<Utc> {
        monday() + Duration::minutes(minutes)
    }

    pub fn event(kind: EventKind, actor: &str, room: RoomId, minutes: i64) -> Event {
        Event::new(kind, UserId::from(actor), room, at(minutes))
    }

    pub fn place_event(
        kind: EventKind,
        actor: &str,
        room: RoomId,
        place: PlaceId,
        minutes: i64,
    ) -> Event {
        event(kind, actor, room, minutes).with_place(place)
    }
}
