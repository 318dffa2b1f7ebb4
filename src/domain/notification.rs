//! Post-commit notifications.
//!
//! Every successful write emits a [`Notification`] after the underlying
//! event is durable. Notifications are delivered to registered handlers
//! by [`crate::service::Notifier`], which also broadcasts them to
//! streaming subscribers.

use serde::Serialize;

use super::{BoostView, PlaceView, RollView, RoomId, RoomView};

/// Discriminator used to register handlers for one notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A place was created.
    PlaceCreated,
    /// A place was deleted or restored.
    PlaceUpdated,
    /// A roll was drawn.
    RollCreated,
    /// A boost was spent.
    BoostCreated,
    /// A room was created.
    RoomCreated,
    /// A room's membership changed.
    RoomUpdated,
}

/// Notification emitted after a write has committed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// Emitted when a new place is added to a room.
    PlaceCreated(PlaceView),
    /// Emitted when a place is deleted or restored.
    PlaceUpdated(PlaceView),
    /// Emitted after a successful roll.
    RollCreated(RollView),
    /// Emitted after a successful boost.
    BoostCreated(BoostView),
    /// Emitted when a room is created.
    RoomCreated(RoomView),
    /// Emitted when someone joins or leaves a room.
    RoomUpdated(RoomView),
}

impl Notification {
    /// Returns the room the notification belongs to.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::PlaceCreated(view) | Self::PlaceUpdated(view) => view.place.room_id,
            Self::RollCreated(view) => view.roll.room_id,
            Self::BoostCreated(view) => view.boost.room_id,
            Self::RoomCreated(view) | Self::RoomUpdated(view) => view.room.id,
        }
    }

    /// Returns the kind used for handler dispatch.
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::PlaceCreated(_) => NotificationKind::PlaceCreated,
            Self::PlaceUpdated(_) => NotificationKind::PlaceUpdated,
            Self::RollCreated(_) => NotificationKind::RollCreated,
            Self::BoostCreated(_) => NotificationKind::BoostCreated,
            Self::RoomCreated(_) => NotificationKind::RoomCreated,
            Self::RoomUpdated(_) => NotificationKind::RoomUpdated,
        }
    }

    /// Returns the notification type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::PlaceCreated(_) => "place_created",
            Self::PlaceUpdated(_) => "place_updated",
            Self::RollCreated(_) => "roll_created",
            Self::BoostCreated(_) => "boost_created",
            Self::RoomCreated(_) => "room_created",
            Self::RoomUpdated(_) => "room_updated",
        }
    }
}
