//! Read-through cache over one projection.
//!
//! Every scope (a room, or a user for memberships) owns a [`Slot`] holding
//! the full materialized collection behind a small state machine
//! (`Uninitialized → Populating → Ready`) plus a per-key map that also
//! remembers negative lookups. There is no TTL: the cache stays correct
//! because every write goes through [`ReadThroughCache::observe`] right
//! after it is durable. A write that bypasses the cache leaves it stale.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::domain::{Event, EventId, sort_by_time};
use crate::error::BackendError;
use crate::persistence::EventLog;
use crate::projection::{Projection, Source, State, fold};

/// Fetches every event of `scope` that `P` reads.
async fn fetch<P: Projection>(
    log: &dyn EventLog,
    scope: &P::Scope,
) -> Result<Vec<Event>, BackendError> {
    match P::source(scope) {
        Source::Group(group_id) => log.by_group(group_id, P::KINDS).await,
        Source::Actor(actor_id) => log.by_actor(actor_id, P::KINDS).await,
    }
}

/// A fully loaded scope: the events in replay order and their fold.
struct Loaded<P: Projection> {
    events: Vec<Event>,
    seen: HashSet<EventId>,
    state: State<P>,
}

impl<P: Projection> Loaded<P> {
    fn new(mut events: Vec<Event>) -> Self {
        sort_by_time(&mut events);
        let seen = events.iter().map(|event| event.id).collect();
        let state = fold::<P>(&events);
        Self {
            events,
            seen,
            state,
        }
    }

    /// Adds one event. Returns `true` if the whole state was refolded.
    fn push(&mut self, event: &Event) -> bool {
        if !self.seen.insert(event.id) {
            return false;
        }
        let in_order = self
            .events
            .last()
            .is_none_or(|last| last.timestamp <= event.timestamp);
        if in_order {
            P::apply(&mut self.state, event);
            self.events.push(event.clone());
            false
        } else {
            // Late arrival from a concurrent writer: replay from scratch so
            // the state matches a fresh materialization of the log.
            let at = self
                .events
                .partition_point(|e| e.timestamp <= event.timestamp);
            self.events.insert(at, event.clone());
            self.state = fold::<P>(&self.events);
            true
        }
    }

    /// Entities in the order replay first touched them.
    fn in_replay_order(&self) -> Vec<P::Entity> {
        let mut emitted = BTreeSet::new();
        self.events
            .iter()
            .filter_map(P::key_of)
            .filter(|key| emitted.insert(key.clone()))
            .filter_map(|key| self.state.get(&key).cloned())
            .collect()
    }
}

enum Collection<P: Projection> {
    Uninitialized,
    Populating { buffered: Vec<Event> },
    Ready(Loaded<P>),
}

struct Slot<P: Projection> {
    collection: Collection<P>,
    /// `None` caches a negative lookup.
    keys: BTreeMap<P::Key, Option<P::Entity>>,
    /// Newest timestamp reflected in `keys` while the collection is not ready.
    watermark: Option<DateTime<Utc>>,
    /// Bumped by every observed write.
    generation: u64,
}

impl<P: Projection> Default for Slot<P> {
    fn default() -> Self {
        Self {
            collection: Collection::Uninitialized,
            keys: BTreeMap::new(),
            watermark: None,
            generation: 0,
        }
    }
}

impl<P: Projection> Slot<P> {
    fn lookup(&self, key: &P::Key) -> Option<Option<P::Entity>> {
        if let Some(hit) = self.keys.get(key) {
            return Some(hit.clone());
        }
        match &self.collection {
            Collection::Ready(loaded) => Some(loaded.state.get(key).cloned()),
            Collection::Uninitialized | Collection::Populating { .. } => None,
        }
    }

    fn mirror_keys(&mut self) {
        let Collection::Ready(loaded) = &self.collection else {
            return;
        };
        for (key, cached) in &mut self.keys {
            *cached = loaded.state.get(key).cloned();
        }
        for (key, entity) in &loaded.state {
            self.keys.insert(key.clone(), Some(entity.clone()));
        }
    }

    fn observe(&mut self, event: &Event) {
        self.generation = self.generation.wrapping_add(1);
        match &mut self.collection {
            Collection::Ready(loaded) => {
                if loaded.push(event) {
                    self.mirror_keys();
                } else if let Some(key) = P::key_of(event) {
                    let current = loaded.state.get(&key).cloned();
                    self.keys.insert(key, current);
                }
            }
            Collection::Populating { buffered } => {
                buffered.push(event.clone());
                self.observe_key(event);
            }
            Collection::Uninitialized => self.observe_key(event),
        }
    }

    fn observe_key(&mut self, event: &Event) {
        if self.watermark.is_some_and(|w| event.timestamp < w) {
            self.keys.clear();
            self.watermark = None;
            return;
        }
        self.watermark = Some(event.timestamp);
        let Some(key) = P::key_of(event) else {
            return;
        };
        if let Some(cached) = self.keys.get_mut(&key) {
            let mut single = State::<P>::new();
            if let Some(entity) = cached.take() {
                single.insert(key.clone(), entity);
            }
            P::apply(&mut single, event);
            *cached = single.remove(&key);
        }
    }
}

/// Memoizes one projection per scope, read-through to the event log.
pub struct ReadThroughCache<P: Projection> {
    slots: RwLock<HashMap<P::Scope, Slot<P>>>,
    loaded: Notify,
    loads: AtomicU64,
}

impl<P: Projection> fmt::Debug for ReadThroughCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("projection", &P::NAME)
            .field("scopes", &self.slots.read().len())
            .field("loads", &self.loads())
            .finish()
    }
}

impl<P: Projection> Default for ReadThroughCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Projection> ReadThroughCache<P> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            loaded: Notify::new(),
            loads: AtomicU64::new(0),
        }
    }

    /// Number of call-throughs to the event log so far.
    #[must_use]
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Returns the full materialized collection of `scope`.
    ///
    /// The first caller loads it from the log; concurrent callers wait for
    /// that single load instead of issuing their own.
    ///
    /// # Errors
    ///
    /// Returns the log's [`BackendError`] unchanged. Failures are not
    /// cached; the next call retries the load.
    pub async fn collection(
        &self,
        log: &dyn EventLog,
        scope: &P::Scope,
    ) -> Result<State<P>, BackendError> {
        self.read_loaded(log, scope, |loaded| loaded.state.clone())
            .await
    }

    /// Returns the entities of `scope` in replay order.
    ///
    /// Entities whose events share a timestamp keep the order the log
    /// returned them in, unlike the key order of [`Self::collection`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::collection`].
    pub async fn in_replay_order(
        &self,
        log: &dyn EventLog,
        scope: &P::Scope,
    ) -> Result<Vec<P::Entity>, BackendError> {
        self.read_loaded(log, scope, Loaded::in_replay_order).await
    }

    async fn read_loaded<R>(
        &self,
        log: &dyn EventLog,
        scope: &P::Scope,
        read: impl Fn(&Loaded<P>) -> R,
    ) -> Result<R, BackendError> {
        if let Some(Collection::Ready(loaded)) =
            self.slots.read().get(scope).map(|slot| &slot.collection)
        {
            return Ok(read(loaded));
        }

        loop {
            let notified = {
                let mut slots = self.slots.write();
                let slot = slots.entry(scope.clone()).or_default();
                if let Collection::Ready(loaded) = &slot.collection {
                    return Ok(read(loaded));
                }
                if matches!(slot.collection, Collection::Uninitialized) {
                    slot.collection = Collection::Populating {
                        buffered: Vec::new(),
                    };
                    break;
                }
                self.loaded.notified()
            };
            notified.await;
        }

        let claim = Claim {
            cache: self,
            scope,
            armed: true,
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(projection = P::NAME, scope = %scope, "populating cache slot");
        let events = fetch::<P>(log, scope).await?;
        Ok(claim.complete(events, read))
    }

    /// Returns one entity, `None` if it does not exist.
    ///
    /// Outcomes, negative ones included, are cached per key.
    ///
    /// # Errors
    ///
    /// Returns the log's [`BackendError`] unchanged; failures are not
    /// cached.
    pub async fn get(
        &self,
        log: &dyn EventLog,
        scope: &P::Scope,
        key: &P::Key,
    ) -> Result<Option<P::Entity>, BackendError> {
        let generation = {
            let slots = self.slots.read();
            match slots.get(scope) {
                Some(slot) => {
                    if let Some(hit) = slot.lookup(key) {
                        return Ok(hit);
                    }
                    slot.generation
                }
                None => 0,
            }
        };

        self.loads.fetch_add(1, Ordering::Relaxed);
        let events = fetch::<P>(log, scope).await?;
        let newest = events.iter().map(|event| event.timestamp).max();
        let outcome = crate::projection::materialize::<P>(events)
            .get(key)
            .cloned();

        let mut slots = self.slots.write();
        let slot = slots.entry(scope.clone()).or_default();
        // A write landed while we were reading; our view may predate it.
        if slot.generation == generation {
            slot.keys.insert(key.clone(), outcome.clone());
            slot.watermark = slot.watermark.max(newest);
        }
        Ok(outcome)
    }

    /// Applies a durable event to the cached state of its scope.
    ///
    /// Must only be called after the event was appended to the log.
    pub fn observe(&self, event: &Event) {
        if !P::reads(event.kind) {
            return;
        }
        let scope = P::scope_of(event);
        self.slots.write().entry(scope).or_default().observe(event);
    }
}

/// Ownership of an in-flight load. Dropping it unfinished (error or
/// cancellation) returns the slot to `Uninitialized` and wakes waiters.
struct Claim<'a, P: Projection> {
    cache: &'a ReadThroughCache<P>,
    scope: &'a P::Scope,
    armed: bool,
}

impl<P: Projection> Claim<'_, P> {
    fn complete<R>(mut self, fetched: Vec<Event>, read: impl Fn(&Loaded<P>) -> R) -> R {
        let out = self.install(fetched, read);
        self.armed = false;
        self.cache.loaded.notify_waiters();
        out
    }

    fn install<R>(&self, fetched: Vec<Event>, read: impl Fn(&Loaded<P>) -> R) -> R {
        let mut slots = self.cache.slots.write();
        let slot = slots.entry(self.scope.clone()).or_default();
        let buffered = match std::mem::replace(&mut slot.collection, Collection::Uninitialized) {
            Collection::Populating { buffered } => buffered,
            Collection::Uninitialized => Vec::new(),
            Collection::Ready(loaded) => {
                let out = read(&loaded);
                slot.collection = Collection::Ready(loaded);
                return out;
            }
        };

        let mut events = fetched;
        let known: HashSet<EventId> = events.iter().map(|event| event.id).collect();
        events.extend(
            buffered
                .into_iter()
                .filter(|event| !known.contains(&event.id)),
        );

        let loaded = Loaded::<P>::new(events);
        let out = read(&loaded);
        slot.collection = Collection::Ready(loaded);
        slot.watermark = None;
        slot.mirror_keys();
        out
    }
}

impl<P: Projection> Drop for Claim<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(slot) = self.cache.slots.write().get_mut(self.scope)
            && matches!(slot.collection, Collection::Populating { .. })
        {
            slot.collection = Collection::Uninitialized;
        }
        tracing::debug!(projection = P::NAME, scope = %self.scope, "cache load abandoned");
        self.cache.loaded.notify_waiters();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::future::join_all;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::domain::{EventKind, PlaceId, RoomId, UserId};
    use crate::persistence::InMemoryEventLog;
    use crate::projection::fixtures::place_event;
    use crate::projection::{PlacesProjection, materialize};

    /// Wraps the in-memory log with read counting, failures and pauses.
    #[derive(Debug, Default)]
    struct ScriptedLog {
        inner: InMemoryEventLog,
        reads: AtomicUsize,
        failing: AtomicBool,
        delay: Option<Duration>,
        gate: Option<Semaphore>,
        fetched: Notify,
    }

    impl ScriptedLog {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn open_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(Semaphore::MAX_PERMITS / 2);
            }
        }

        async fn pause(&self, events: Vec<Event>) -> Result<Vec<Event>, BackendError> {
            self.fetched.notify_one();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            Ok(events)
        }

        fn check(&self) -> Result<(), BackendError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(BackendError::Io("scripted outage".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventLog for ScriptedLog {
        async fn append(&self, event: &Event) -> Result<(), BackendError> {
            self.inner.append(event).await
        }

        async fn by_group(
            &self,
            group_id: RoomId,
            kinds: &[EventKind],
        ) -> Result<Vec<Event>, BackendError> {
            self.check()?;
            let events = self.inner.by_group(group_id, kinds).await?;
            self.pause(events).await
        }

        async fn by_actor(
            &self,
            actor_id: &UserId,
            kinds: &[EventKind],
        ) -> Result<Vec<Event>, BackendError> {
            self.check()?;
            let events = self.inner.by_actor(actor_id, kinds).await?;
            self.pause(events).await
        }
    }

    async fn write(log: &ScriptedLog, cache: &ReadThroughCache<PlacesProjection>, event: Event) {
        let Ok(()) = log.append(&event).await else {
            panic!("append failed");
        };
        cache.observe(&event);
    }

    fn created(room: RoomId, place: PlaceId, minutes: i64) -> Event {
        place_event(EventKind::PlaceCreated, "u1", room, place, minutes).with_payload("Pho")
    }

    #[tokio::test]
    async fn repeated_lists_hit_the_log_once() {
        let log = ScriptedLog::default();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        write(&log, &cache, created(room, PlaceId::new(), 0)).await;

        for _ in 0..3 {
            let Ok(state) = cache.collection(&log, &room).await else {
                panic!("collection failed");
            };
            assert_eq!(state.len(), 1);
        }
        assert_eq!(log.reads(), 1);
        assert_eq!(cache.loads(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_access_loads_once() {
        let log = ScriptedLog {
            delay: Some(Duration::from_millis(20)),
            ..ScriptedLog::default()
        };
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        write(&log, &cache, created(room, PlaceId::new(), 0)).await;

        let results = join_all((0..8).map(|_| cache.collection(&log, &room))).await;
        for result in results {
            let Ok(state) = result else {
                panic!("collection failed");
            };
            assert_eq!(state.len(), 1);
        }
        assert_eq!(log.reads(), 1);
    }

    #[tokio::test]
    async fn negative_lookup_is_cached_until_a_write() {
        let log = ScriptedLog::default();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        let place = PlaceId::new();

        for _ in 0..2 {
            let Ok(found) = cache.get(&log, &room, &place).await else {
                panic!("get failed");
            };
            assert!(found.is_none());
        }
        assert_eq!(log.reads(), 1);

        write(&log, &cache, created(room, place, 5)).await;
        let Ok(Some(found)) = cache.get(&log, &room, &place).await else {
            panic!("expected the new place");
        };
        assert_eq!(found.name, "Pho");
        assert_eq!(log.reads(), 1);
    }

    #[tokio::test]
    async fn write_during_population_is_kept() {
        let log = ScriptedLog::gated();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        let first = PlaceId::new();
        let second = PlaceId::new();
        write(&log, &cache, created(room, first, 0)).await;

        let (listed, ()) = tokio::join!(cache.collection(&log, &room), async {
            log.fetched.notified().await;
            write(&log, &cache, created(room, second, 5)).await;
            log.open_gate();
        });

        let Ok(state) = listed else {
            panic!("collection failed");
        };
        assert!(state.contains_key(&first));
        assert!(state.contains_key(&second));
        let Ok(again) = cache.collection(&log, &room).await else {
            panic!("collection failed");
        };
        assert_eq!(again, state);
        assert_eq!(log.reads(), 1);
    }

    #[tokio::test]
    async fn cancelled_load_releases_the_slot() {
        let log = ScriptedLog::gated();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        write(&log, &cache, created(room, PlaceId::new(), 0)).await;

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.collection(&log, &room)).await;
        assert!(timed_out.is_err());

        log.open_gate();
        let Ok(state) = cache.collection(&log, &room).await else {
            panic!("collection failed after cancellation");
        };
        assert_eq!(state.len(), 1);
        assert_eq!(log.reads(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let log = ScriptedLog::default();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        let place = PlaceId::new();
        write(&log, &cache, created(room, place, 0)).await;

        log.failing.store(true, Ordering::SeqCst);
        assert!(cache.collection(&log, &room).await.is_err());
        assert!(cache.get(&log, &room, &place).await.is_err());

        log.failing.store(false, Ordering::SeqCst);
        let Ok(Some(found)) = cache.get(&log, &room, &place).await else {
            panic!("get failed after recovery");
        };
        assert_eq!(found.id, place);
        let Ok(state) = cache.collection(&log, &room).await else {
            panic!("collection failed after recovery");
        };
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn ties_keep_log_order_on_load_and_on_write() {
        let log = ScriptedLog::default();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        let mut written = Vec::new();
        for _ in 0..6 {
            let place = PlaceId::new();
            written.push(place);
            write(&log, &cache, created(room, place, 5)).await;
        }
        let Ok(loaded) = cache.in_replay_order(&log, &room).await else {
            panic!("load failed");
        };
        assert_eq!(loaded.iter().map(|p| p.id).collect::<Vec<_>>(), written);

        for _ in 0..6 {
            let place = PlaceId::new();
            written.push(place);
            write(&log, &cache, created(room, place, 5)).await;
        }
        // A late event forces a refold; ties must survive it too.
        let early = PlaceId::new();
        written.insert(0, early);
        write(&log, &cache, created(room, early, 1)).await;

        let Ok(warm) = cache.in_replay_order(&log, &room).await else {
            panic!("read failed");
        };
        assert_eq!(warm.iter().map(|p| p.id).collect::<Vec<_>>(), written);
        assert_eq!(log.reads(), 1);
    }

    #[tokio::test]
    async fn late_event_matches_fresh_materialization() {
        let log = ScriptedLog::default();
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let room = RoomId::new();
        let place = PlaceId::new();
        write(&log, &cache, created(room, place, 0)).await;
        write(
            &log,
            &cache,
            place_event(EventKind::PlaceDeleted, "u1", room, place, 20),
        )
        .await;
        let Ok(_) = cache.collection(&log, &room).await else {
            panic!("collection failed");
        };

        // Stamped before the delete but observed after it.
        write(
            &log,
            &cache,
            place_event(EventKind::PlaceRestored, "u2", room, place, 10),
        )
        .await;

        let Ok(cached) = cache.collection(&log, &room).await else {
            panic!("collection failed");
        };
        let fresh = materialize::<PlacesProjection>(log.inner.snapshot().await);
        assert_eq!(cached, fresh);
        assert!(cached.get(&place).is_some_and(|p| p.is_deleted));

        let Ok(Some(single)) = cache.get(&log, &room, &place).await else {
            panic!("get failed");
        };
        assert!(single.is_deleted);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let log = Arc::new(ScriptedLog::default());
        let cache = ReadThroughCache::<PlacesProjection>::new();
        let (a, b) = (RoomId::new(), RoomId::new());
        write(&log, &cache, created(a, PlaceId::new(), 0)).await;

        let Ok(in_b) = cache.collection(log.as_ref(), &b).await else {
            panic!("collection failed");
        };
        assert!(in_b.is_empty());
        let Ok(in_a) = cache.collection(log.as_ref(), &a).await else {
            panic!("collection failed");
        };
        assert_eq!(in_a.len(), 1);
        assert_eq!(log.reads(), 2);
    }
}
