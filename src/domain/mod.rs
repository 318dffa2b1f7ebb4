//! Domain layer: identifiers, events, entities, views and notifications.
//!
//! Events are the only durable state. Entities are what replaying those
//! events produces, views are entities decorated for callers, and
//! notifications announce committed writes.

pub mod event;
pub mod ids;
pub mod notification;
pub mod place;
pub mod roll;
pub mod room;
pub mod user;
pub mod views;

pub use event::{Event, EventKind, UnknownEventKind, sort_by_time};
pub use ids::{EventId, PlaceId, RoomId, UserId};
pub use notification::{Notification, NotificationKind};
pub use place::Place;
pub use roll::{Boost, Roll};
pub use room::Room;
pub use user::User;
pub use views::{BoostView, PlaceView, RollView, RoomView};
