//! Room entity: a named group of members.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{RoomId, UserId};

/// A room materialized from `rooms/*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Display name given at creation.
    pub name: String,
    /// User who created the room.
    pub owner_id: UserId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Current members after replaying every join and leave.
    pub member_ids: BTreeSet<UserId>,
}

impl Room {
    /// Returns `true` if the user is currently a member.
    #[must_use]
    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.member_ids.contains(user_id)
    }
}
