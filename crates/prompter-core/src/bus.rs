use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::message::Message;
use crate::types::{ChannelId, MessageId};

/// Store-and-forward message bus keyed by channel.
///
/// A published message is handed to every live subscriber in subscription
/// order, or buffered when nobody is listening; the next subscriber to
/// attach replays the buffer in arrival order. Replies to pending input
/// requests are claimed by the waiter registered for their correlation id.
/// A message is delivered or buffered, never both, never lost.
///
/// All mutation happens under one lock that is never held across an await,
/// so publish, subscribe, and unsubscribe are linearizable and per-channel
/// order is exactly publish order. Subscribers receive through their own
/// unbounded queue — a slow consumer cannot block delivery to the rest.
#[derive(Default)]
pub struct MessageBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    channels: HashMap<ChannelId, ChannelState>,
    next_subscriber_id: u64,
}

#[derive(Default)]
struct ChannelState {
    buffer: VecDeque<Message>,
    subscribers: Vec<Subscriber>,
    waiters: Vec<ReplyEntry>,
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Message>,
}

struct ReplyEntry {
    parent: MessageId,
    tx: oneshot::Sender<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubscriberId(u64);

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `message` on `channel`, or buffer it when nobody is listening.
    ///
    /// A response or cancellation whose correlation id matches a pending
    /// input request resolves that request first; resolution counts as
    /// delivery. Never returns an error — all user-facing failure travels as
    /// data on the channel.
    pub fn publish(&self, channel: &ChannelId, message: Message) {
        let mut inner = self.lock();
        let state = inner.channels.entry(channel.clone()).or_default();

        let mut claimed = false;
        if let Message::InputFormResponse {
            parent_message_id, ..
        }
        | Message::InputFormCancellation {
            parent_message_id, ..
        } = &message
        {
            if let Some(position) = state
                .waiters
                .iter()
                .position(|waiter| waiter.parent == *parent_message_id)
            {
                let waiter = state.waiters.remove(position);
                if waiter.tx.send(message.clone()).is_ok() {
                    claimed = true;
                } else {
                    // The awaiting future vanished without deregistering.
                    tracing::error!(
                        channel = %channel,
                        parent = %parent_message_id,
                        "pending input request dropped without releasing its registration"
                    );
                }
            }
        }

        state.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        let mut delivered = false;
        for subscriber in &state.subscribers {
            // A receiver can still vanish between the prune and this send;
            // only a queued handoff counts as delivery.
            if subscriber.tx.send(message.clone()).is_ok() {
                delivered = true;
            }
        }

        if !claimed && !delivered {
            tracing::trace!(channel = %channel, kind = message.kind(), "buffered message");
            state.buffer.push_back(message);
        }
    }

    /// Attach a new subscriber to `channel`.
    ///
    /// Any buffered messages are drained into the new subscriber's queue, in
    /// original arrival order, before it goes live — pre-existing
    /// subscribers never see the replay. Each call creates a distinct
    /// registration.
    pub fn subscribe(self: &Arc<Self>, channel: &ChannelId) -> Subscription {
        let (guard, rx) = self.subscribe_split(channel);
        Subscription { guard, rx }
    }

    /// [`MessageBus::subscribe`], split into the release guard and the raw
    /// receiver so a caller can hand the receiver to a pump task while
    /// keeping synchronous control over the registration.
    pub fn subscribe_split(
        self: &Arc<Self>,
        channel: &ChannelId,
    ) -> (SubscriberGuard, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = SubscriberId(inner.next_subscriber_id);
        inner.next_subscriber_id += 1;

        let state = inner.channels.entry(channel.clone()).or_default();
        for message in state.buffer.drain(..) {
            // Cannot fail: `rx` is alive in this scope.
            let _ = tx.send(message);
        }
        state.subscribers.push(Subscriber { id, tx });

        let guard = SubscriberGuard {
            bus: Arc::clone(self),
            channel: channel.clone(),
            id,
        };
        (guard, rx)
    }

    /// Register a pending input request on `channel`.
    ///
    /// The waiter resolves with the first response or cancellation published
    /// whose `parentMessageId` equals `parent`; everything else is left for
    /// subscribers and the buffer. The registration is released on
    /// resolution and on drop.
    pub fn watch_replies(self: &Arc<Self>, channel: &ChannelId, parent: &MessageId) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let state = inner.channels.entry(channel.clone()).or_default();
        state.waiters.push(ReplyEntry {
            parent: parent.clone(),
            tx,
        });
        ReplyWaiter {
            bus: Arc::clone(self),
            channel: channel.clone(),
            parent: parent.clone(),
            rx,
        }
    }

    fn unsubscribe(&self, channel: &ChannelId, id: SubscriberId) {
        let mut inner = self.lock();
        if let Some(state) = inner.channels.get_mut(channel) {
            state.subscribers.retain(|subscriber| subscriber.id != id);
        }
    }

    fn remove_waiter(&self, channel: &ChannelId, parent: &MessageId) {
        let mut inner = self.lock();
        if let Some(state) = inner.channels.get_mut(channel) {
            state.waiters.retain(|waiter| waiter.parent != *parent);
        }
    }

    #[cfg(test)]
    fn buffered(&self, channel: &ChannelId) -> Vec<Message> {
        self.lock()
            .channels
            .get(channel)
            .map(|state| state.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map(|state| state.subscribers.len())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn waiter_count(&self, channel: &ChannelId) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map(|state| state.waiters.len())
            .unwrap_or_default()
    }
}

/// Release handle for one subscriber registration.
///
/// Releasing is idempotent and also happens on drop.
pub struct SubscriberGuard {
    bus: Arc<MessageBus>,
    channel: ChannelId,
    id: SubscriberId,
}

impl SubscriberGuard {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Remove this subscriber from the channel. Safe to call repeatedly.
    pub fn release(&self) {
        self.bus.unsubscribe(&self.channel, self.id);
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A live attachment to one channel.
///
/// Yields buffered replay first, then every message published while
/// attached, in publish order. Dropping the subscription (or calling
/// [`Subscription::unsubscribe`]) releases the registration; messages
/// already queued remain receivable afterwards.
pub struct Subscription {
    guard: SubscriberGuard,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelId {
        self.guard.channel()
    }

    /// Next message, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Release the registration. Idempotent.
    pub fn unsubscribe(&self) {
        self.guard.release();
    }
}

/// One pending input request: the suspended side of a `request_input` call.
///
/// Resolves at most once, with the first correlated response or
/// cancellation. Dropping the waiter releases its registration.
pub struct ReplyWaiter {
    bus: Arc<MessageBus>,
    channel: ChannelId,
    parent: MessageId,
    rx: oneshot::Receiver<Message>,
}

impl ReplyWaiter {
    pub fn parent(&self) -> &MessageId {
        &self.parent
    }

    /// Suspend until the correlated reply arrives.
    ///
    /// `None` means the bus discarded the registration without resolving it,
    /// which indicates a core bug; callers treat it as cancellation.
    pub async fn recv(mut self) -> Option<Message> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.bus.remove_waiter(&self.channel, &self.parent);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::message::current_timestamp;
    use crate::types::SessionId;

    fn channel(name: &str) -> ChannelId {
        ChannelId::from(&SessionId::from(name))
    }

    fn render(id: &str) -> Message {
        Message::RenderInputForm {
            id: MessageId::from(id),
            timestamp: current_timestamp(),
            form: crate::message::Form::new(),
        }
    }

    fn response(id: &str, parent: &str) -> Message {
        Message::InputFormResponse {
            id: MessageId::from(id),
            timestamp: current_timestamp(),
            parent_message_id: MessageId::from(parent),
            data: crate::message::FormData::new(),
            session: None,
        }
    }

    fn cancellation(id: &str, parent: &str) -> Message {
        Message::InputFormCancellation {
            id: MessageId::from(id),
            timestamp: current_timestamp(),
            parent_message_id: MessageId::from(parent),
            session: None,
        }
    }

    #[tokio::test]
    async fn replays_buffered_messages_in_order() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        for n in 0..5 {
            bus.publish(&channel, render(&format!("r{n}")));
        }
        assert_eq!(bus.buffered(&channel).len(), 5);

        let mut subscription = bus.subscribe(&channel);
        for n in 0..5 {
            let message = subscription.recv().await.unwrap();
            assert_eq!(message.id().as_str(), format!("r{n}"));
        }
        assert!(bus.buffered(&channel).is_empty());
    }

    #[tokio::test]
    async fn live_delivery_never_reaches_the_buffer() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let mut first = bus.subscribe(&channel);
        let mut second = bus.subscribe(&channel);
        bus.publish(&channel, render("r1"));

        assert_eq!(first.recv().await.unwrap().id().as_str(), "r1");
        assert_eq!(second.recv().await.unwrap().id().as_str(), "r1");
        assert!(bus.buffered(&channel).is_empty());

        // A subscriber attaching later sees no replay of the live message.
        drop(first);
        drop(second);
        let mut third = bus.subscribe(&channel);
        let outcome = timeout(Duration::from_millis(20), third.recv()).await;
        assert!(outcome.is_err(), "expected no replay for delivered message");
    }

    #[tokio::test]
    async fn replay_goes_only_to_the_new_subscriber() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        bus.publish(&channel, render("r1"));
        let mut first = bus.subscribe(&channel);
        assert_eq!(first.recv().await.unwrap().id().as_str(), "r1");

        bus.publish(&channel, render("r2"));
        let mut second = bus.subscribe(&channel);

        assert_eq!(first.recv().await.unwrap().id().as_str(), "r2");
        let outcome = timeout(Duration::from_millis(20), second.recv()).await;
        assert!(outcome.is_err(), "drain must not replay delivered messages");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_detaches() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let subscription = bus.subscribe(&channel);
        assert_eq!(bus.subscriber_count(&channel), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(bus.subscriber_count(&channel), 0);

        bus.publish(&channel, render("r1"));
        assert_eq!(bus.buffered(&channel).len(), 1);
        drop(subscription);
        assert_eq!(bus.buffered(&channel).len(), 1);
    }

    #[tokio::test]
    async fn messages_queued_before_unsubscribe_remain_receivable() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let mut subscription = bus.subscribe(&channel);
        bus.publish(&channel, render("r1"));
        subscription.unsubscribe();

        assert_eq!(subscription.recv().await.unwrap().id().as_str(), "r1");
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn waiter_resolves_with_matching_response() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let waiter = bus.watch_replies(&channel, &MessageId::from("r1"));
        bus.publish(&channel, response("m1", "r1"));

        let resolved = waiter.recv().await.unwrap();
        assert_eq!(resolved.parent_message_id(), Some(&MessageId::from("r1")));
        assert!(bus.buffered(&channel).is_empty());
        assert_eq!(bus.waiter_count(&channel), 0);
    }

    #[tokio::test]
    async fn waiter_resolves_with_matching_cancellation() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let waiter = bus.watch_replies(&channel, &MessageId::from("r1"));
        bus.publish(&channel, cancellation("m1", "r1"));

        let resolved = waiter.recv().await.unwrap();
        assert_eq!(resolved.kind(), "INPUT_FORM_CANCELLATION");
    }

    #[tokio::test]
    async fn waiter_ignores_unrelated_messages() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let waiter = bus.watch_replies(&channel, &MessageId::from("a"));
        bus.publish(&channel, render("r9"));
        bus.publish(&channel, response("m1", "b"));

        // Both messages fell through to the buffer untouched.
        assert_eq!(bus.buffered(&channel).len(), 2);
        assert_eq!(bus.waiter_count(&channel), 1);
        drop(waiter);
        assert_eq!(bus.waiter_count(&channel), 0);
    }

    #[tokio::test]
    async fn first_match_wins_and_later_matches_route_normally() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let waiter = bus.watch_replies(&channel, &MessageId::from("r1"));
        bus.publish(&channel, response("m1", "r1"));
        bus.publish(&channel, response("m2", "r1"));

        let resolved = waiter.recv().await.unwrap();
        assert_eq!(resolved.id().as_str(), "m1");
        // The second response found no waiter and no subscriber.
        let buffered = bus.buffered(&channel);
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].id().as_str(), "m2");
    }

    #[tokio::test]
    async fn concurrent_waiters_resolve_independently() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let waiter_a = bus.watch_replies(&channel, &MessageId::from("a"));
        let waiter_b = bus.watch_replies(&channel, &MessageId::from("b"));

        bus.publish(&channel, response("m1", "b"));
        let resolved = waiter_b.recv().await.unwrap();
        assert_eq!(resolved.id().as_str(), "m1");

        // "a" is still pending.
        assert_eq!(bus.waiter_count(&channel), 1);
        bus.publish(&channel, cancellation("m2", "a"));
        assert_eq!(waiter_a.recv().await.unwrap().id().as_str(), "m2");
    }

    #[tokio::test]
    async fn subscriber_and_waiter_both_observe_a_reply() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let mut subscription = bus.subscribe(&channel);
        let waiter = bus.watch_replies(&channel, &MessageId::from("r1"));
        bus.publish(&channel, response("m1", "r1"));

        assert_eq!(waiter.recv().await.unwrap().id().as_str(), "m1");
        assert_eq!(subscription.recv().await.unwrap().id().as_str(), "m1");
        assert!(bus.buffered(&channel).is_empty());
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = Arc::new(MessageBus::new());
        let left = channel("s1");
        let right = channel("s2");

        bus.publish(&left, render("r1"));
        let mut subscription = bus.subscribe(&right);
        let outcome = timeout(Duration::from_millis(20), subscription.recv()).await;
        assert!(outcome.is_err(), "channels must not share buffers");
        assert_eq!(bus.buffered(&left).len(), 1);
    }

    #[tokio::test]
    async fn dead_subscribers_do_not_count_as_delivery() {
        let bus = Arc::new(MessageBus::new());
        let channel = channel("s1");

        let (guard, rx) = bus.subscribe_split(&channel);
        // Drop the receiving half without releasing the registration;
        // publish must notice the closed queue and fall back to the buffer.
        drop(rx);

        bus.publish(&channel, render("r1"));
        assert_eq!(bus.buffered(&channel).len(), 1);
        assert_eq!(bus.subscriber_count(&channel), 0);
        drop(guard);
    }
}
