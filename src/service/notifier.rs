//! Post-commit notification fan-out.
//!
//! Handlers are registered per [`NotificationKind`]. [`Notifier::notify`]
//! never blocks the write path: it enqueues one job per handler on a
//! bounded queue and returns. A dispatcher task drains the queue and runs
//! at most `max_in_flight` handlers at a time. A full queue drops the job.
//! A failing or panicking handler is logged. Neither reaches the caller.
//!
//! Every notification is also broadcast to receivers obtained from
//! [`Notifier::subscribe`]. A receiver that falls more than the broadcast capacity behind misses the
//! oldest notifications and sees `RecvError::Lagged`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, broadcast, mpsc};

use crate::domain::{Notification, NotificationKind};

/// Type-erased notification handler.
pub type Handler =
    Arc<dyn Fn(Notification) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Job {
    handler: Handler,
    notification: Notification,
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct NotifierStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    broadcast: AtomicU64,
    unheard: AtomicU64,
}

impl NotifierStats {
    /// Handler runs that returned `Ok`.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler runs that returned an error or panicked.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Jobs discarded because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Notifications handed to at least one subscriber.
    #[must_use]
    pub fn broadcast(&self) -> u64 {
        self.broadcast.load(Ordering::Relaxed)
    }

    /// Notifications published while nobody was subscribed.
    #[must_use]
    pub fn unheard(&self) -> u64 {
        self.unheard.load(Ordering::Relaxed)
    }
}

/// Handler registry, the bounded job queue feeding it, and the broadcast
/// channel for subscribers.
pub struct Notifier {
    handlers: RwLock<HashMap<NotificationKind, Vec<Handler>>>,
    queue: mpsc::Sender<Job>,
    subscribers: broadcast::Sender<Notification>,
    stats: Arc<NotifierStats>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: usize = self.handlers.read().values().map(Vec::len).sum();
        f.debug_struct("Notifier")
            .field("handlers", &handlers)
            .field("queue_capacity", &self.queue.max_capacity())
            .field("subscribers", &self.subscribers.receiver_count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Creates a notifier and spawns its dispatcher.
    ///
    /// Must be called from within a Tokio runtime. The dispatcher exits once
    /// the notifier is dropped and the queue is drained.
    #[must_use]
    pub fn new(broadcast_capacity: usize, queue_capacity: usize, max_in_flight: usize) -> Self {
        let (queue, jobs) = mpsc::channel(queue_capacity.max(1));
        let (subscribers, _) = broadcast::channel(broadcast_capacity.max(1));
        let stats = Arc::new(NotifierStats::default());
        tokio::spawn(dispatch(jobs, max_in_flight.max(1), Arc::clone(&stats)));
        Self {
            handlers: RwLock::new(HashMap::new()),
            queue,
            subscribers,
            stats,
        }
    }

    /// Registers `handler` for every future notification of `kind`.
    pub fn on<F, Fut>(&self, kind: NotificationKind, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |notification| handler(notification).boxed());
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Queues one job per handler registered for the notification's kind
    /// and broadcasts it to current subscribers.
    pub fn notify(&self, notification: Notification) {
        let handlers = self
            .handlers
            .read()
            .get(&notification.kind())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            let job = Job {
                handler,
                notification: notification.clone(),
            };
            match self.queue.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event_type = job.notification.event_type_str(),
                        room_id = %job.notification.room_id(),
                        "notification queue full, dropping job"
                    );
                }
                Err(TrySendError::Closed(job)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        event_type = job.notification.event_type_str(),
                        room_id = %job.notification.room_id(),
                        "notification dispatcher stopped, dropping job"
                    );
                }
            }
        }

        self.publish(notification);
    }

    fn publish(&self, notification: Notification) {
        if self.subscribers.receiver_count() == 0 {
            self.stats.unheard.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // The last receiver may go away between the check and the send.
        let counter = match self.subscribers.send(notification) {
            Ok(_) => &self.stats.broadcast,
            Err(_) => &self.stats.unheard,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> &NotifierStats {
        &self.stats
    }

    /// Returns a receiver of every notification published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.subscribers.subscribe()
    }
}

async fn dispatch(mut jobs: mpsc::Receiver<Job>, max_in_flight: usize, stats: Arc<NotifierStats>) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    while let Some(job) = jobs.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let event_type = job.notification.event_type_str();
            let room_id = job.notification.room_id();
            let Job {
                handler,
                notification,
            } = job;
            // Run the handler in its own task so a panic surfaces as a
            // `JoinError` instead of tearing down the dispatcher.
            let outcome = tokio::spawn(async move { handler(notification).await }).await;
            match outcome {
                Ok(Ok(())) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(error)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(event_type, %room_id, %error, "notification handler failed");
                }
                Err(error) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(event_type, %room_id, %error, "notification handler panicked");
                }
            }
            drop(permit);
        });
    }
    tracing::debug!("notification queue closed");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::domain::{Room, RoomId, RoomView, UserId};

    fn room_created() -> Notification {
        Notification::RoomCreated(RoomView {
            room: Room {
                id: RoomId::new(),
                name: "lunch".to_string(),
                owner_id: UserId::from("u1"),
                created_at: Utc::now(),
                member_ids: BTreeSet::new(),
            },
            user: None,
            members: Vec::new(),
        })
    }

    async fn succeed(_: Notification) -> anyhow::Result<()> {
        Ok(())
    }

    async fn offline(_: Notification) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("chat bridge offline"))
    }

    async fn explode(_: Notification) -> anyhow::Result<()> {
        panic!("handler bug");
    }

    async fn settle(stats: &NotifierStats, finished: u64) {
        for _ in 0..200 {
            if stats.delivered() + stats.failed() >= finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handlers did not finish");
    }

    #[tokio::test]
    async fn every_handler_of_the_kind_runs_once() {
        let notifier = Notifier::new(16, 16, 4);
        let runs = Arc::new(AtomicU64::new(0));
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            notifier.on(NotificationKind::RoomCreated, move |_| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            });
        }
        notifier.on(NotificationKind::RollCreated, explode);

        notifier.notify(room_created());
        settle(notifier.stats(), 2).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.stats().failed(), 0);
    }

    #[tokio::test]
    async fn failures_and_panics_are_counted_not_propagated() {
        let notifier = Notifier::new(16, 16, 4);
        notifier.on(NotificationKind::RoomCreated, offline);
        notifier.on(NotificationKind::RoomCreated, explode);
        notifier.on(NotificationKind::RoomCreated, succeed);

        notifier.notify(room_created());
        settle(notifier.stats(), 3).await;
        assert_eq!(notifier.stats().failed(), 2);
        assert_eq!(notifier.stats().delivered(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_jobs() {
        let notifier = Notifier::new(16, 1, 1);
        notifier.on(NotificationKind::RoomCreated, succeed);

        // The dispatcher cannot run between these calls on this runtime.
        for _ in 0..3 {
            notifier.notify(room_created());
        }
        assert_eq!(notifier.stats().dropped(), 2);
        settle(notifier.stats(), 1).await;
        assert_eq!(notifier.stats().delivered(), 1);
    }

    #[test]
    fn stopped_dispatcher_drops_jobs() {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
            panic!("runtime failed");
        };
        let notifier = {
            let _entered = runtime.enter();
            Notifier::new(16, 16, 4)
        };
        notifier.on(NotificationKind::RoomCreated, succeed);
        // Shutting the runtime down drops the dispatcher and closes the queue.
        drop(runtime);

        notifier.notify(room_created());
        assert_eq!(notifier.stats().dropped(), 1);
        assert_eq!(notifier.stats().delivered(), 0);
    }

    #[tokio::test]
    async fn notifications_reach_subscribers() {
        let notifier = Notifier::new(16, 16, 4);
        let mut rx = notifier.subscribe();
        let sent = room_created();
        let room_id = sent.room_id();
        notifier.notify(sent);

        let Ok(received) = rx.recv().await else {
            panic!("expected a notification");
        };
        assert_eq!(received.room_id(), room_id);
        assert_eq!(notifier.stats().broadcast(), 1);
        assert_eq!(notifier.stats().unheard(), 0);
    }

    #[tokio::test]
    async fn broadcasts_without_subscribers_are_counted_as_unheard() {
        let notifier = Notifier::new(16, 16, 4);
        notifier.notify(room_created());

        let rx = notifier.subscribe();
        drop(rx);
        notifier.notify(room_created());

        assert_eq!(notifier.stats().unheard(), 2);
        assert_eq!(notifier.stats().broadcast(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_notification() {
        let notifier = Notifier::new(16, 16, 4);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        let sent = room_created();
        let room_id = sent.room_id();
        notifier.notify(sent);

        for rx in [&mut first, &mut second] {
            let Ok(received) = rx.recv().await else {
                panic!("subscriber missed the notification");
            };
            assert_eq!(received.room_id(), room_id);
        }
        assert_eq!(notifier.stats().broadcast(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_past_capacity() {
        let notifier = Notifier::new(2, 16, 4);
        let mut rx = notifier.subscribe();
        for _ in 0..4 {
            notifier.notify(room_created());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }
}
