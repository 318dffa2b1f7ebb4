//! Read-only view objects returned at the roller's boundary.
//!
//! A view is a materialized entity plus the resolved user record (and, for
//! places, the current selection probability). Views are never persisted.

use serde::Serialize;

use super::{Boost, Place, Roll, Room, User};

/// A place annotated with its creator and selection probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceView {
    /// The materialized place.
    #[serde(flatten)]
    pub place: Place,
    /// Creator record, if the directory knows the user.
    pub user: Option<User>,
    /// Probability of being picked by the next roll, `weight / Σweights`.
    pub chance: f64,
}

/// A roll annotated with its actor and the picked place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollView {
    /// The materialized roll.
    #[serde(flatten)]
    pub roll: Roll,
    /// Actor record, if the directory knows the user.
    pub user: Option<User>,
    /// The picked place, if it still exists in the room.
    pub place: Option<Place>,
}

/// A boost annotated with its actor and the boosted place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoostView {
    /// The materialized boost.
    #[serde(flatten)]
    pub boost: Boost,
    /// Actor record, if the directory knows the user.
    pub user: Option<User>,
    /// The boosted place, if it still exists in the room.
    pub place: Option<Place>,
}

/// A room annotated with its owner and resolved members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomView {
    /// The materialized room.
    #[serde(flatten)]
    pub room: Room,
    /// Owner record, if the directory knows the user.
    pub user: Option<User>,
    /// Member records the directory could resolve, ordered by user id.
    pub members: Vec<User>,
}
