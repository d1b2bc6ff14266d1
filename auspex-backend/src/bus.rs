//! Typed publish/subscribe bus.
//!
//! Subscribers register for one or more kinds and receive copies of matching
//! events on their own bounded queue, in publish order. Publishing never waits
//! on a subscriber: an event that doesn't fit is dropped for that subscriber and
//! counted on that subscriber's [`Subscription::dropped`] and reported on the
//! [`EventBus::overflows`] side channel.
//!
//! ```text
//! publish(e) ──► routes[e.kind()] ──┬─► [queue S1] ──► S1.recv()
//!                                   ├─► [queue S2] ──► S2.recv()
//!                                   └─► ...
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use auspex_state::{Event, EventKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

/// Something the bus can route.
pub trait Routed: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

impl Routed for Event {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        Event::kind(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Reported when a subscriber's queue was full and an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow<K> {
    pub subscription: SubscriptionId,
    pub kind: K,
}

struct Slot<E> {
    id: SubscriptionId,
    sender: mpsc::Sender<E>,
    dropped: Arc<AtomicU64>,
}

struct BusInner<E: Routed> {
    routes: scc::HashMap<E::Kind, Vec<Slot<E>>>,
    next_id: AtomicU64,
    capacity: usize,
    overflow: broadcast::Sender<Overflow<E::Kind>>,
    closed: AtomicBool,
}

pub struct EventBus<E: Routed> {
    inner: Arc<BusInner<E>>,
}

impl<E: Routed> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Routed> EventBus<E> {
    /// `capacity` bounds every subscriber queue.
    pub fn new(capacity: usize) -> Self {
        let (overflow, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(BusInner {
                routes: scc::HashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                overflow,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn subscribe(&self, kind: E::Kind) -> Subscription<E> {
        self.subscribe_many(&[kind]).await
    }

    /// One queue for several kinds, so their relative order is preserved.
    pub async fn subscribe_many(&self, kinds: &[E::Kind]) -> Subscription<E> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let unsubscribe = Unsubscribe {
            id,
            kinds: kinds.into(),
            bus: Arc::downgrade(&self.inner),
            done: Arc::new(AtomicBool::new(false)),
        };

        if !self.inner.closed.load(Ordering::Acquire) {
            for kind in kinds {
                let slot = Slot {
                    id,
                    sender: sender.clone(),
                    dropped: dropped.clone(),
                };
                if let Err((kind, rejected)) =
                    self.inner.routes.insert_async(*kind, vec![slot]).await
                {
                    self.inner
                        .routes
                        .update_async(&kind, |_, slots| slots.extend(rejected))
                        .await;
                }
            }
            // close() may have cleared the routes while we were inserting.
            if self.inner.closed.load(Ordering::Acquire) {
                unsubscribe.remove_slots(&self.inner).await;
            } else {
                debug!(subscription = id.0, ?kinds, "subscribed");
            }
        }

        Subscription {
            id,
            receiver,
            dropped,
            unsubscribe,
        }
    }

    /// Deliver a copy of `event` to every subscriber of its kind. Returns the
    /// number of queues it landed in.
    pub async fn publish(&self, event: E) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            return 0;
        }
        let kind = event.kind();
        let mut overflowed = Vec::new();

        let delivered = self
            .inner
            .routes
            .update_async(&kind, |_, slots| {
                let mut delivered = 0;
                slots.retain(|slot| match slot.sender.try_send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        slot.dropped.fetch_add(1, Ordering::Relaxed);
                        overflowed.push(slot.id);
                        true
                    }
                    // Receiver dropped without unsubscribing.
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
                delivered
            })
            .await
            .unwrap_or(0);

        for subscription in overflowed {
            warn!(subscription = subscription.0, ?kind, "subscriber queue full, event dropped");
            // No listeners is fine.
            let _ = self.inner.overflow.send(Overflow { subscription, kind });
        }
        if delivered == 0 {
            trace!(?kind, "no subscribers");
        }
        delivered
    }

    /// Side channel carrying an [`Overflow`] for every dropped delivery, across
    /// all subscribers. Lossy under load; use [`Subscription::dropped`] to tell
    /// whether a particular queue lost events.
    pub fn overflows(&self) -> broadcast::Receiver<Overflow<E::Kind>> {
        self.inner.overflow.subscribe()
    }

    /// Drop every queue. Readers drain what is left and then see `None`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.routes.retain_async(|_, _| false).await;
        debug!("bus closed");
    }

    pub async fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.inner
            .routes
            .read_async(&kind, |_, slots| slots.len())
            .await
            .unwrap_or(0)
    }
}

/// A registered subscriber queue.
pub struct Subscription<E: Routed> {
    id: SubscriptionId,
    receiver: mpsc::Receiver<E>,
    dropped: Arc<AtomicU64>,
    unsubscribe: Unsubscribe<E>,
}

impl<E: Routed> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Events dropped because this queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// A handle that can stop delivery from elsewhere.
    pub fn unsubscriber(&self) -> Unsubscribe<E> {
        self.unsubscribe.clone()
    }

    pub async fn unsubscribe(&self) {
        self.unsubscribe.unsubscribe().await
    }
}

/// Stops delivery to a subscription. Idempotent.
pub struct Unsubscribe<E: Routed> {
    id: SubscriptionId,
    kinds: Arc<[E::Kind]>,
    bus: Weak<BusInner<E>>,
    done: Arc<AtomicBool>,
}

impl<E: Routed> Clone for Unsubscribe<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kinds: self.kinds.clone(),
            bus: self.bus.clone(),
            done: self.done.clone(),
        }
    }
}

impl<E: Routed> Unsubscribe<E> {
    pub async fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        self.remove_slots(&inner).await;
        debug!(subscription = self.id.0, "unsubscribed");
    }

    async fn remove_slots(&self, inner: &BusInner<E>) {
        let id = self.id;
        for kind in self.kinds.iter() {
            inner
                .routes
                .update_async(kind, |_, slots| slots.retain(|s| s.id != id))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Note {
        Ping(u32),
        Pong(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum NoteKind {
        Ping,
        Pong,
    }

    impl Routed for Note {
        type Kind = NoteKind;

        fn kind(&self) -> NoteKind {
            match self {
                Note::Ping(_) => NoteKind::Ping,
                Note::Pong(_) => NoteKind::Pong,
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::<Note>::new(8);
        assert_eq!(bus.publish(Note::Ping(1)).await, 0);
    }

    #[tokio::test]
    async fn test_delivery_is_filtered_by_kind() {
        let bus = EventBus::new(8);
        let mut pings = bus.subscribe(NoteKind::Ping).await;
        let mut pongs = bus.subscribe(NoteKind::Pong).await;

        bus.publish(Note::Ping(1)).await;
        bus.publish(Note::Pong(2)).await;

        assert_eq!(pings.recv().await, Some(Note::Ping(1)));
        assert_eq!(pongs.recv().await, Some(Note::Pong(2)));
        assert!(pings.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy_in_order() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe(NoteKind::Ping).await;
        let mut second = bus.subscribe(NoteKind::Ping).await;
        assert_eq!(bus.subscriber_count(NoteKind::Ping).await, 2);

        for n in 0..3 {
            assert_eq!(bus.publish(Note::Ping(n)).await, 2);
        }
        for n in 0..3 {
            assert_eq!(first.recv().await, Some(Note::Ping(n)));
            assert_eq!(second.recv().await, Some(Note::Ping(n)));
        }
    }

    #[tokio::test]
    async fn test_subscribe_many_keeps_cross_kind_order() {
        let bus = EventBus::new(8);
        let mut both = bus.subscribe_many(&[NoteKind::Ping, NoteKind::Pong]).await;

        bus.publish(Note::Pong(1)).await;
        bus.publish(Note::Ping(2)).await;
        bus.publish(Note::Pong(3)).await;

        assert_eq!(both.recv().await, Some(Note::Pong(1)));
        assert_eq!(both.recv().await, Some(Note::Ping(2)));
        assert_eq!(both.recv().await, Some(Note::Pong(3)));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_closes_queue() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe(NoteKind::Ping).await;
        bus.publish(Note::Ping(1)).await;

        sub.unsubscribe().await;
        sub.unsubscribe().await;
        sub.unsubscriber().unsubscribe().await;

        assert_eq!(bus.publish(Note::Ping(2)).await, 0);
        assert_eq!(sub.recv().await, Some(Note::Ping(1)));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_reports_overflow() {
        let bus = EventBus::new(1);
        let mut overflows = bus.overflows();
        let mut sub = bus.subscribe(NoteKind::Ping).await;

        assert_eq!(bus.publish(Note::Ping(1)).await, 1);
        assert_eq!(bus.publish(Note::Ping(2)).await, 0);

        let overflow = overflows.recv().await.unwrap();
        assert_eq!(overflow.subscription, sub.id());
        assert_eq!(overflow.kind, NoteKind::Ping);
        assert_eq!(sub.recv().await, Some(Note::Ping(1)));

        // Still usable once drained.
        assert_eq!(bus.publish(Note::Ping(3)).await, 1);
    }

    #[tokio::test]
    async fn test_drops_are_counted_per_subscription() {
        let bus = EventBus::new(1);
        let mut busy = bus.subscribe(NoteKind::Ping).await;
        let idle = bus.subscribe(NoteKind::Ping).await;

        for n in 0..10 {
            bus.publish(Note::Ping(n)).await;
            assert_eq!(busy.recv().await, Some(Note::Ping(n)));
        }

        assert_eq!(busy.dropped(), 0);
        assert_eq!(idle.dropped(), 9);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(NoteKind::Ping).await;
        drop(sub);

        assert_eq!(bus.publish(Note::Ping(1)).await, 0);
        assert_eq!(bus.subscriber_count(NoteKind::Ping).await, 0);
    }

    #[tokio::test]
    async fn test_close_ends_every_stream() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe(NoteKind::Pong).await;
        bus.publish(Note::Pong(1)).await;
        bus.close().await;

        assert_eq!(sub.recv().await, Some(Note::Pong(1)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(bus.publish(Note::Pong(2)).await, 0);

        let mut late = bus.subscribe(NoteKind::Pong).await;
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_close_still_ends() {
        let bus = EventBus::<Note>::new(4);
        let subscribers: Vec<_> = (0..32)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move { bus.subscribe_many(&[NoteKind::Ping, NoteKind::Pong]).await })
            })
            .collect();
        bus.close().await;

        for subscriber in subscribers {
            let mut sub = subscriber.await.unwrap();
            let end = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
            assert_eq!(end.unwrap(), None);
        }
        assert_eq!(bus.subscriber_count(NoteKind::Ping).await, 0);
        assert_eq!(bus.subscriber_count(NoteKind::Pong).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unsubscribe_during_publish_keeps_bus_usable() {
        let bus = EventBus::new(1024);
        let victim = bus.subscribe(NoteKind::Ping).await;
        let mut survivor = bus.subscribe(NoteKind::Ping).await;

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for n in 0..500 {
                    bus.publish(Note::Ping(n)).await;
                }
            })
        };
        let handle = victim.unsubscriber();
        let unsubscriber = tokio::spawn(async move { handle.unsubscribe().await });

        publisher.await.unwrap();
        unsubscriber.await.unwrap();

        for n in 0..500 {
            let got = tokio::time::timeout(Duration::from_secs(1), survivor.recv()).await;
            assert_eq!(got.unwrap(), Some(Note::Ping(n)));
        }
        assert_eq!(bus.subscriber_count(NoteKind::Ping).await, 1);
        drop(victim);
    }
}
