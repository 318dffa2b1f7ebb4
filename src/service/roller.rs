//! Roller: the engine's entry point.
//!
//! Every operation takes the caller's identity in-band and, for writes, the
//! instant to stamp on the event. Writes follow the same path: validate
//! against materialized state, append through the [`Repository`], then
//! hand a view to the [`Notifier`]. Notification failures never reach the
//! caller because the write has already committed.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};

use crate::cache::Repository;
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::domain::{
    Boost, BoostView, Event, EventKind, Notification, NotificationKind, Place, PlaceId,
    PlaceView, Roll, RollView, Room, RoomId, RoomView, User, UserId,
};
use crate::error::LunchError;
use crate::persistence::{self, EventLog};

use super::history::{History, Rules};
use super::lottery::{Lottery, chances};
use super::notifier::{Notifier, NotifierStats};

type RoomLocks = Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>;

/// Held for the duration of one roll or boost.
#[derive(Debug)]
struct RoomGuard<'a> {
    locks: &'a RoomLocks,
    room_id: RoomId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoomGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only handed out under the map lock, so a count of one
        // means no other task holds or waits on this room.
        let mut locks = self.locks.lock();
        if locks
            .get(&self.room_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.room_id);
        }
    }
}

/// Orchestrates rooms, places, rolls and boosts for many rooms at once.
///
/// Rolls and boosts of one room are serialized by a per-room lock so the
/// quota check and the append it guards cannot interleave with another
/// roll or boost of the same room in this process. A room's lock is
/// forgotten once nobody holds or awaits it.
#[derive(Debug)]
pub struct Roller {
    repository: Repository,
    directory: Arc<dyn UserDirectory>,
    lottery: Lottery,
    notifier: Notifier,
    rules: Rules,
    room_locks: RoomLocks,
}

impl Roller {
    /// Creates a roller over an existing event log.
    ///
    /// Must be called from within a Tokio runtime; the notification
    /// dispatcher is spawned here.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        directory: Arc<dyn UserDirectory>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            repository: Repository::new(log),
            directory,
            lottery: Lottery::new(config.lottery_seed),
            notifier: Notifier::new(
                config.broadcast_capacity,
                config.notify_queue_capacity,
                config.notify_max_in_flight,
            ),
            rules: config.rules.clone(),
            room_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the event log selected by `config` and builds a roller on it.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Config`] if the quota rules are invalid, or
    /// [`LunchError::Backend`] if the event log cannot be opened.
    pub async fn connect(
        config: &EngineConfig,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self, LunchError> {
        config.rules.validate()?;
        let log = persistence::connect(config).await?;
        Ok(Self::new(log, directory, config))
    }

    /// Returns the repository backing this roller.
    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Returns the quota and weighting rules in force.
    #[must_use]
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Creates a room owned by `user_id`, who becomes its first member.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::InvalidRequest`] for a blank name, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn create_room(
        &self,
        user_id: &UserId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<RoomView, LunchError> {
        let name = validate_name("room", name)?;
        let room_id = RoomId::new();
        let event = Event::new(EventKind::RoomCreated, user_id.clone(), room_id, now)
            .with_payload(name);
        self.repository.store(&event).await?;

        let view = self.room(room_id).await?;
        tracing::info!(%room_id, owner_id = %user_id, "room created");
        self.notifier.notify(Notification::RoomCreated(view.clone()));
        Ok(view)
    }

    /// Adds `user_id` to a room.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the room does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn join_room(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Result<RoomView, LunchError> {
        self.change_membership(EventKind::RoomJoined, user_id, room_id, now)
            .await
    }

    /// Removes `user_id` from a room.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the room does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn leave_room(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Result<RoomView, LunchError> {
        self.change_membership(EventKind::RoomLeft, user_id, room_id, now)
            .await
    }

    async fn change_membership(
        &self,
        kind: EventKind,
        user_id: &UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Result<RoomView, LunchError> {
        self.existing_room(room_id).await?;
        let event = Event::new(kind, user_id.clone(), room_id, now);
        self.repository.store(&event).await?;

        let view = self.room(room_id).await?;
        tracing::info!(%room_id, %user_id, %kind, "room membership changed");
        self.notifier.notify(Notification::RoomUpdated(view.clone()));
        Ok(view)
    }

    /// Returns one room with its owner and members resolved.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the room does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn room(&self, room_id: RoomId) -> Result<RoomView, LunchError> {
        let room = self.existing_room(room_id).await?;
        let users = self.users().await?;
        Ok(room_view(room, &users))
    }

    /// Returns the rooms `user_id` belongs to, oldest membership first.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if a collaborator fails.
    pub async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<RoomView>, LunchError> {
        let memberships = self.repository.memberships(user_id).await?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.users().await?;
        let mut views = Vec::with_capacity(memberships.len());
        for membership in memberships {
            if let Some(room) = self.repository.room(membership.room_id).await? {
                views.push(room_view(room, &users));
            }
        }
        Ok(views)
    }

    /// Adds a place to a room.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::InvalidRequest`] for a blank name,
    /// [`LunchError::NotFound`] if the room does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn create_place(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<PlaceView, LunchError> {
        let name = validate_name("place", name)?;
        self.existing_room(room_id).await?;

        let place_id = PlaceId::new();
        let event = Event::new(EventKind::PlaceCreated, user_id.clone(), room_id, now)
            .with_place(place_id)
            .with_payload(name);
        self.repository.store(&event).await?;

        let view = self.place_view(room_id, place_id, now).await?;
        tracing::info!(%room_id, %place_id, creator_id = %user_id, "place created");
        self.notifier.notify(Notification::PlaceCreated(view.clone()));
        Ok(view)
    }

    /// Soft-deletes a place. It stays in the log and can be restored.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the place does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn delete_place(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        place_id: PlaceId,
        now: DateTime<Utc>,
    ) -> Result<PlaceView, LunchError> {
        self.toggle_place(EventKind::PlaceDeleted, user_id, room_id, place_id, now)
            .await
    }

    /// Restores a soft-deleted place.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the place does not exist, or
    /// [`LunchError::Backend`] if a collaborator fails.
    pub async fn restore_place(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        place_id: PlaceId,
        now: DateTime<Utc>,
    ) -> Result<PlaceView, LunchError> {
        self.toggle_place(EventKind::PlaceRestored, user_id, room_id, place_id, now)
            .await
    }

    async fn toggle_place(
        &self,
        kind: EventKind,
        user_id: &UserId,
        room_id: RoomId,
        place_id: PlaceId,
        now: DateTime<Utc>,
    ) -> Result<PlaceView, LunchError> {
        if self.repository.place(room_id, place_id).await?.is_none() {
            return Err(LunchError::not_found("place", place_id));
        }
        let event =
            Event::new(kind, user_id.clone(), room_id, now).with_place(place_id);
        self.repository.store(&event).await?;

        let view = self.place_view(room_id, place_id, now).await?;
        tracing::info!(%room_id, %place_id, %user_id, %kind, "place updated");
        self.notifier.notify(Notification::PlaceUpdated(view.clone()));
        Ok(view)
    }

    /// Lists the live places of a room with their current chance of being
    /// rolled, oldest first. A room without places yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if a collaborator fails.
    pub async fn list_places(
        &self,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlaceView>, LunchError> {
        let places = self.live_places(room_id).await?;
        if places.is_empty() {
            return Ok(Vec::new());
        }
        let history = self.history(room_id, now).await?;
        let chances = chances(&history.weights(&place_ids(&places), now));
        let users = self.users().await?;

        let mut views: Vec<PlaceView> = places
            .into_values()
            .map(|place| PlaceView {
                chance: chances.get(&place.id).copied().unwrap_or_default(),
                user: users.get(&place.creator_id).cloned(),
                place,
            })
            .collect();
        views.sort_by_key(|view| view.place.created_at);
        Ok(views)
    }

    /// Spends a point to multiply a place's weight until the next roll.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NotFound`] if the place does not exist or is
    /// deleted, [`LunchError::NoPoints`] if the user has no points left
    /// this week, or [`LunchError::Backend`] if a collaborator fails.
    pub async fn boost(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        place_id: PlaceId,
        now: DateTime<Utc>,
    ) -> Result<BoostView, LunchError> {
        let user = self.user(user_id).await?;
        let guard = self.lock_room(room_id).await;

        let place = self
            .repository
            .place(room_id, place_id)
            .await?
            .filter(|place| !place.is_deleted)
            .ok_or_else(|| LunchError::not_found("place", place_id))?;
        let history = self.history(room_id, now).await?;
        history.can_boost(user_id)?;

        let event = Event::new(EventKind::BoostCreated, user_id.clone(), room_id, now)
            .with_place(place_id);
        self.repository.store(&event).await?;
        drop(guard);

        let view = BoostView {
            boost: Boost {
                id: event.id,
                user_id: user_id.clone(),
                place_id,
                room_id,
                time: now,
            },
            user,
            place: Some(place),
        };
        tracing::info!(%room_id, %place_id, %user_id, "boost created");
        self.notifier.notify(Notification::BoostCreated(view.clone()));
        Ok(view)
    }

    /// Draws today's place for a room.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::NoPlaces`] if the room has no live places
    /// (checked before the quota), [`LunchError::NoPoints`] if this is a
    /// reroll and the user has no points left, or [`LunchError::Backend`] if
    /// a collaborator fails.
    pub async fn roll(
        &self,
        user_id: &UserId,
        room_id: RoomId,
        now: DateTime<Utc>,
    ) -> Result<RollView, LunchError> {
        let user = self.user(user_id).await?;
        let guard = self.lock_room(room_id).await;

        let mut places = self.live_places(room_id).await?;
        if places.is_empty() {
            return Err(LunchError::NoPlaces);
        }
        let history = self.history(room_id, now).await?;
        history.can_roll(user_id, now)?;

        let weights = history.weights(&place_ids(&places), now);
        let place_id = self.lottery.pick(&weights).ok_or(LunchError::NoPlaces)?;
        let event = Event::new(EventKind::RollCreated, user_id.clone(), room_id, now)
            .with_place(place_id);
        self.repository.store(&event).await?;
        drop(guard);

        let view = RollView {
            roll: Roll {
                id: event.id,
                user_id: user_id.clone(),
                place_id,
                room_id,
                time: now,
            },
            user,
            place: places.remove(&place_id),
        };
        tracing::info!(%room_id, %place_id, %user_id, "roll created");
        self.notifier.notify(Notification::RollCreated(view.clone()));
        Ok(view)
    }

    /// Lists every roll of a room, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if a collaborator fails.
    pub async fn list_rolls(&self, room_id: RoomId) -> Result<Vec<RollView>, LunchError> {
        let rolls = self.repository.rolls(room_id).await?;
        if rolls.is_empty() {
            return Ok(Vec::new());
        }
        let places = self.repository.places(room_id).await?;
        let users = self.users().await?;
        Ok(rolls
            .into_iter()
            .map(|roll| RollView {
                user: users.get(&roll.user_id).cloned(),
                place: places.get(&roll.place_id).cloned(),
                roll,
            })
            .collect())
    }

    /// Lists every boost of a room, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LunchError::Backend`] if a collaborator fails.
    pub async fn list_boosts(&self, room_id: RoomId) -> Result<Vec<BoostView>, LunchError> {
        let boosts = self.repository.boosts(room_id).await?;
        if boosts.is_empty() {
            return Ok(Vec::new());
        }
        let places = self.repository.places(room_id).await?;
        let users = self.users().await?;
        Ok(boosts
            .into_iter()
            .map(|boost| BoostView {
                user: users.get(&boost.user_id).cloned(),
                place: places.get(&boost.place_id).cloned(),
                boost,
            })
            .collect())
    }

    /// Runs `handler` after every place creation.
    pub fn on_place_created<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::PlaceCreated, handler);
    }

    /// Runs `handler` after every place deletion or restore.
    pub fn on_place_updated<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::PlaceUpdated, handler);
    }

    /// Runs `handler` after every boost.
    pub fn on_boost_created<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::BoostCreated, handler);
    }

    /// Runs `handler` after every roll.
    pub fn on_roll_created<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::RollCreated, handler);
    }

    /// Runs `handler` after every room creation.
    pub fn on_room_created<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::RoomCreated, handler);
    }

    /// Runs `handler` after every join or leave.
    pub fn on_room_updated<F, Fut>(&self, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notifier.on(NotificationKind::RoomUpdated, handler);
    }

    /// Returns a receiver of every notification from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Notification delivery counters.
    #[must_use]
    pub fn notifier_stats(&self) -> &NotifierStats {
        self.notifier.stats()
    }

    async fn lock_room(&self, room_id: RoomId) -> RoomGuard<'_> {
        let lock = Arc::clone(self.room_locks.lock().entry(room_id).or_default());
        RoomGuard {
            locks: &self.room_locks,
            room_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn existing_room(&self, room_id: RoomId) -> Result<Room, LunchError> {
        self.repository
            .room(room_id)
            .await?
            .ok_or_else(|| LunchError::not_found("room", room_id))
    }

    async fn user(&self, user_id: &UserId) -> Result<Option<User>, LunchError> {
        self.directory
            .get(user_id)
            .await
            .map_err(|e| LunchError::backend("get user", e))
    }

    async fn users(&self) -> Result<HashMap<UserId, User>, LunchError> {
        self.directory
            .list()
            .await
            .map_err(|e| LunchError::backend("list users", e))
    }

    async fn live_places(&self, room_id: RoomId) -> Result<BTreeMap<PlaceId, Place>, LunchError> {
        let mut places = self.repository.places(room_id).await?;
        places.retain(|_, place| !place.is_deleted);
        Ok(places)
    }

    async fn history(&self, room_id: RoomId, now: DateTime<Utc>) -> Result<History, LunchError> {
        let rolls = self.repository.rolls(room_id).await?;
        let boosts = self.repository.boosts(room_id).await?;
        Ok(History::build(&rolls, &boosts, now, &self.rules))
    }

    async fn place_view(
        &self,
        room_id: RoomId,
        place_id: PlaceId,
        now: DateTime<Utc>,
    ) -> Result<PlaceView, LunchError> {
        let place = self
            .repository
            .place(room_id, place_id)
            .await?
            .ok_or_else(|| LunchError::not_found("place", place_id))?;
        let chance = if place.is_deleted {
            0.0
        } else {
            let places = self.live_places(room_id).await?;
            let history = self.history(room_id, now).await?;
            chances(&history.weights(&place_ids(&places), now))
                .get(&place_id)
                .copied()
                .unwrap_or_default()
        };
        let user = self.user(&place.creator_id).await?;
        Ok(PlaceView {
            place,
            user,
            chance,
        })
    }
}

fn place_ids(places: &BTreeMap<PlaceId, Place>) -> Vec<PlaceId> {
    places.keys().copied().collect()
}

fn room_view(room: Room, users: &HashMap<UserId, User>) -> RoomView {
    let members = room
        .member_ids
        .iter()
        .filter_map(|member_id| users.get(member_id).cloned())
        .collect();
    RoomView {
        user: users.get(&room.owner_id).cloned(),
        members,
        room,
    }
}

fn validate_name<'a>(kind: &str, name: &'a str) -> Result<&'a str, LunchError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LunchError::InvalidRequest(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(trimmed)
}
