//! Typed access to materialized entities.

use std::sync::Arc;

use crate::domain::{Boost, Event, Place, PlaceId, Roll, Room, RoomId, UserId};
use crate::error::LunchError;
use crate::persistence::EventLog;
use crate::projection::{
    BoostsProjection, Membership, MembershipsProjection, PlacesProjection, RollsProjection,
    RoomsProjection, State,
};

use super::ReadThroughCache;

/// Event log plus one read-through cache per entity kind.
///
/// Every write must go through [`Repository::store`]; appending to the log
/// directly leaves the caches stale until the process restarts.
#[derive(Debug)]
pub struct Repository {
    log: Arc<dyn EventLog>,
    places: ReadThroughCache<PlacesProjection>,
    rolls: ReadThroughCache<RollsProjection>,
    boosts: ReadThroughCache<BoostsProjection>,
    rooms: ReadThroughCache<RoomsProjection>,
    memberships: ReadThroughCache<MembershipsProjection>,
}

impl Repository {
    /// Creates a repository with cold caches over `log`.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            places: ReadThroughCache::new(),
            rolls: ReadThroughCache::new(),
            boosts: ReadThroughCache::new(),
            rooms: ReadThroughCache::new(),
            memberships: ReadThroughCache::new(),
        }
    }

    /// Returns the underlying event log.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Appends `event` to the log, then folds it into the caches.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the append fails; caches are left
    /// untouched in that case.
    pub async fn store(&self, event: &Event) -> Result<(), LunchError> {
        self.log
            .append(event)
            .await
            .map_err(|e| LunchError::backend("append event", e))?;

        self.places.observe(event);
        self.rolls.observe(event);
        self.boosts.observe(event);
        self.rooms.observe(event);
        self.memberships.observe(event);

        tracing::debug!(
            event_id = %event.id,
            kind = %event.kind,
            group_id = %event.group_id,
            "event stored"
        );
        Ok(())
    }

    /// Every place of a room, deleted ones included, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn places(&self, room_id: RoomId) -> Result<State<PlacesProjection>, LunchError> {
        self.places
            .collection(self.log.as_ref(), &room_id)
            .await
            .map_err(|e| LunchError::backend("load places", e))
    }

    /// One place of a room, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn place(
        &self,
        room_id: RoomId,
        place_id: PlaceId,
    ) -> Result<Option<Place>, LunchError> {
        self.places
            .get(self.log.as_ref(), &room_id, &place_id)
            .await
            .map_err(|e| LunchError::backend("load place", e))
    }

    /// Every roll of a room, oldest first. Rolls sharing a timestamp keep
    /// log order.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn rolls(&self, room_id: RoomId) -> Result<Vec<Roll>, LunchError> {
        self.rolls
            .in_replay_order(self.log.as_ref(), &room_id)
            .await
            .map_err(|e| LunchError::backend("load rolls", e))
    }

    /// Every boost of a room, oldest first, ties in log order.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn boosts(&self, room_id: RoomId) -> Result<Vec<Boost>, LunchError> {
        self.boosts
            .in_replay_order(self.log.as_ref(), &room_id)
            .await
            .map_err(|e| LunchError::backend("load boosts", e))
    }

    /// One room, `None` if it was never created.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn room(&self, room_id: RoomId) -> Result<Option<Room>, LunchError> {
        self.rooms
            .get(self.log.as_ref(), &room_id, &room_id)
            .await
            .map_err(|e| LunchError::backend("load room", e))
    }

    /// The rooms `user_id` currently belongs to, oldest membership first.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if the log cannot be read.
    pub async fn memberships(&self, user_id: &UserId) -> Result<Vec<Membership>, LunchError> {
        let state = self
            .memberships
            .collection(self.log.as_ref(), user_id)
            .await
            .map_err(|e| LunchError::backend("load memberships", e))?;
        let mut memberships: Vec<Membership> = state.into_values().collect();
        memberships.sort_by_key(|membership| membership.since);
        Ok(memberships)
    }
}
