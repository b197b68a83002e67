//! Publish/subscribe dispatch
//!
//! A subscribed connection receives push frames (`message`, `pmessage` and the
//! subscription acknowledgements) that do not answer any queued command.
//! [`PubSubEndpoint`] recognises them by their leading tag, keeps the
//! channel/pattern registry in step with the acknowledgements, and fans each
//! event out to the registered listeners. Everything else is correlated with
//! the command queue as usual.
//!
//! # Examples
//!
//! ```no_run
//! use resp_endpoint::{PubSubConnection, ConnectionConfig, StringCodec};
//! use futures_util::StreamExt;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::new("redis://localhost:6379");
//! let connection = PubSubConnection::connect(config, Arc::new(StringCodec)).await?;
//!
//! let mut messages = connection.messages();
//! connection.subscribe(&["news".to_string()])?;
//!
//! while let Some(message) = messages.next().await {
//!     println!("{message:?}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::core::{
    codec::RedisCodec,
    config::EndpointConfig,
    error::{RedisError, RedisResult},
    value::RespValue,
};
use crate::endpoint::{ConnectionEvents, Endpoint, Transport};
use crate::protocol::CommandArgs;
use futures_util::Stream;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Pub/Sub push types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PubSubMessageType {
    Subscribe,
    Unsubscribe,
    Message,
    PSubscribe,
    PUnsubscribe,
    PMessage,
}

impl PubSubMessageType {
    fn from_bytes(tag: &[u8]) -> Option<Self> {
        match tag {
            b"subscribe" => Some(Self::Subscribe),
            b"unsubscribe" => Some(Self::Unsubscribe),
            b"message" => Some(Self::Message),
            b"psubscribe" => Some(Self::PSubscribe),
            b"punsubscribe" => Some(Self::PUnsubscribe),
            b"pmessage" => Some(Self::PMessage),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Message => "message",
            Self::PSubscribe => "psubscribe",
            Self::PUnsubscribe => "punsubscribe",
            Self::PMessage => "pmessage",
        }
    }

    /// Tag of a push frame, if `value` is one
    fn classify(value: &RespValue) -> Option<Self> {
        let RespValue::Array(items) = value else {
            return None;
        };
        match items.first()? {
            RespValue::BulkString(tag) => Self::from_bytes(tag),
            RespValue::SimpleString(tag) => Self::from_bytes(tag.as_bytes()),
            _ => None,
        }
    }
}

/// A decoded pub/sub event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubMessage<K, V> {
    /// Subscription to a channel confirmed
    Subscribe {
        /// Channel
        channel: K,
        /// Subscriptions held by the connection afterwards
        count: i64,
    },
    /// Subscription to a pattern confirmed
    PSubscribe {
        /// Pattern
        pattern: K,
        /// Subscriptions held by the connection afterwards
        count: i64,
    },
    /// Channel subscription removed. `channel` is `None` when the server had
    /// nothing to remove.
    Unsubscribe {
        /// Channel
        channel: Option<K>,
        /// Subscriptions held by the connection afterwards
        count: i64,
    },
    /// Pattern subscription removed
    PUnsubscribe {
        /// Pattern
        pattern: Option<K>,
        /// Subscriptions held by the connection afterwards
        count: i64,
    },
    /// Message published to a subscribed channel
    Message {
        /// Channel
        channel: K,
        /// Payload
        payload: V,
    },
    /// Message published to a channel matching a subscribed pattern
    PMessage {
        /// Matching pattern
        pattern: K,
        /// Channel the message was published to
        channel: K,
        /// Payload
        payload: V,
    },
}

/// Receiver of pub/sub events.
///
/// Every method has an empty default, so implementors override only what they
/// need. Callbacks run on the connection's read path and should return
/// quickly. A panicking callback is logged and does not stop delivery to the
/// other listeners.
pub trait RedisPubSubListener<K, V>: Send + Sync {
    /// Message received on `channel`
    fn message(&self, _channel: &K, _message: &V) {}

    /// Message received on `channel` through `pattern`
    fn pmessage(&self, _pattern: &K, _channel: &K, _message: &V) {}

    /// Channel subscription confirmed
    fn subscribed(&self, _channel: &K, _count: i64) {}

    /// Pattern subscription confirmed
    fn psubscribed(&self, _pattern: &K, _count: i64) {}

    /// Channel subscription removed
    fn unsubscribed(&self, _channel: Option<&K>, _count: i64) {}

    /// Pattern subscription removed
    fn punsubscribed(&self, _pattern: Option<&K>, _count: i64) {}
}

/// Shared handle to a registered listener
pub type SharedListener<K, V> = Arc<dyn RedisPubSubListener<K, V>>;

type ListenerSnapshot<K, V> = Arc<Vec<SharedListener<K, V>>>;

fn deliver<K, V>(listener: &dyn RedisPubSubListener<K, V>, message: &PubSubMessage<K, V>) {
    match message {
        PubSubMessage::Subscribe { channel, count } => listener.subscribed(channel, *count),
        PubSubMessage::PSubscribe { pattern, count } => listener.psubscribed(pattern, *count),
        PubSubMessage::Unsubscribe { channel, count } => {
            listener.unsubscribed(channel.as_ref(), *count);
        }
        PubSubMessage::PUnsubscribe { pattern, count } => {
            listener.punsubscribed(pattern.as_ref(), *count);
        }
        PubSubMessage::Message { channel, payload } => listener.message(channel, payload),
        PubSubMessage::PMessage {
            pattern,
            channel,
            payload,
        } => listener.pmessage(pattern, channel, payload),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Endpoint of a connection in subscribed mode
pub struct PubSubEndpoint<C: RedisCodec> {
    endpoint: Endpoint,
    codec: Arc<C>,
    channels: Mutex<HashSet<C::Key>>,
    patterns: Mutex<HashSet<C::Key>>,
    listeners: RwLock<ListenerSnapshot<C::Key, C::Value>>,
}

impl<C: RedisCodec> PubSubEndpoint<C> {
    /// Create a disconnected pub/sub endpoint
    pub fn new(config: EndpointConfig, codec: Arc<C>) -> Self {
        Self {
            endpoint: Endpoint::new(config),
            codec,
            channels: Mutex::new(HashSet::new()),
            patterns: Mutex::new(HashSet::new()),
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// The underlying command endpoint, for commands such as `PING` that are
    /// allowed while subscribed
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Codec used for channel names and payloads
    pub const fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    fn send(&self, keyword: &str, keys: &[C::Key]) -> RedisResult<()> {
        let frame = CommandArgs::new(Arc::clone(&self.codec))
            .add_keys(keys)
            .encode_command(keyword);
        debug!(
            endpoint = self.endpoint.id(),
            command = keyword,
            targets = keys.len(),
            "Sending subscription command"
        );
        self.endpoint.write_untracked(frame)
    }

    /// Request subscriptions to `channels`. The registry changes when the
    /// server acknowledges them.
    ///
    /// # Errors
    ///
    /// Returns an error if `channels` is empty or the frame cannot be written.
    pub fn subscribe(&self, channels: &[C::Key]) -> RedisResult<()> {
        if channels.is_empty() {
            return Err(RedisError::InvalidArgument(
                "SUBSCRIBE requires at least one channel".to_string(),
            ));
        }
        self.send("SUBSCRIBE", channels)
    }

    /// Request subscriptions to `patterns`
    ///
    /// # Errors
    ///
    /// Returns an error if `patterns` is empty or the frame cannot be written.
    pub fn psubscribe(&self, patterns: &[C::Key]) -> RedisResult<()> {
        if patterns.is_empty() {
            return Err(RedisError::InvalidArgument(
                "PSUBSCRIBE requires at least one pattern".to_string(),
            ));
        }
        self.send("PSUBSCRIBE", patterns)
    }

    /// Drop subscriptions to `channels`, or to every channel when empty
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn unsubscribe(&self, channels: &[C::Key]) -> RedisResult<()> {
        self.send("UNSUBSCRIBE", channels)
    }

    /// Drop subscriptions to `patterns`, or to every pattern when empty
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn punsubscribe(&self, patterns: &[C::Key]) -> RedisResult<()> {
        self.send("PUNSUBSCRIBE", patterns)
    }

    /// Register a listener. Events are delivered in registration order.
    pub fn add_listener(&self, listener: SharedListener<C::Key, C::Value>) {
        let mut listeners = self.listeners.write();
        let mut next = Vec::with_capacity(listeners.len() + 1);
        next.extend(listeners.iter().cloned());
        next.push(listener);
        *listeners = Arc::new(next);
    }

    /// Deregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &SharedListener<C::Key, C::Value>) -> bool {
        let mut listeners = self.listeners.write();
        let next: Vec<_> = listeners
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != listeners.len();
        *listeners = Arc::new(next);
        removed
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Channels with an acknowledged subscription
    pub fn channels(&self) -> Vec<C::Key> {
        self.channels.lock().iter().cloned().collect()
    }

    /// Patterns with an acknowledged subscription
    pub fn patterns(&self) -> Vec<C::Key> {
        self.patterns.lock().iter().cloned().collect()
    }

    /// Whether a subscription to `channel` was acknowledged
    pub fn is_subscribed(&self, channel: &C::Key) -> bool {
        self.channels.lock().contains(channel)
    }

    /// Whether any channel or pattern subscription is held
    pub fn has_subscriptions(&self) -> bool {
        !self.channels.lock().is_empty() || !self.patterns.lock().is_empty()
    }

    /// Stream of every event delivered after this call. Dropping the stream
    /// deregisters it.
    pub fn messages(self: &Arc<Self>) -> PubSubStream<C> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: SharedListener<C::Key, C::Value> = Arc::new(ChannelListener { tx });
        self.add_listener(Arc::clone(&listener));
        PubSubStream {
            rx,
            endpoint: Arc::downgrade(self),
            listener: Arc::downgrade(&listener),
        }
    }

    /// Apply an event to the registry, then hand it to every listener
    pub fn notify_message(&self, message: PubSubMessage<C::Key, C::Value>) {
        match &message {
            PubSubMessage::Subscribe { channel, .. } => {
                self.channels.lock().insert(channel.clone());
            }
            PubSubMessage::PSubscribe { pattern, .. } => {
                self.patterns.lock().insert(pattern.clone());
            }
            PubSubMessage::Unsubscribe {
                channel: Some(channel),
                ..
            } => {
                self.channels.lock().remove(channel);
            }
            PubSubMessage::PUnsubscribe {
                pattern: Some(pattern),
                ..
            } => {
                self.patterns.lock().remove(pattern);
            }
            _ => {}
        }

        let snapshot = Arc::clone(&*self.listeners.read());
        for listener in snapshot.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref(), &message)));
            if let Err(panic) = outcome {
                error!(
                    endpoint = self.endpoint.id(),
                    panic = panic_message(panic.as_ref()),
                    "Pub/Sub listener panicked, continuing with remaining listeners"
                );
            }
        }
    }

    fn key_at(
        &self,
        items: &[RespValue],
        index: usize,
        kind: PubSubMessageType,
    ) -> RedisResult<C::Key> {
        let item = items.get(index).ok_or_else(|| {
            RedisError::Protocol(format!("{} push is missing element {index}", kind.as_str()))
        })?;
        Ok(self.codec.decode_key(&item.as_bytes()?))
    }

    fn optional_key_at(&self, items: &[RespValue], index: usize) -> RedisResult<Option<C::Key>> {
        match items.get(index) {
            None | Some(RespValue::Null) => Ok(None),
            Some(item) => Ok(Some(self.codec.decode_key(&item.as_bytes()?))),
        }
    }

    fn value_at(
        &self,
        items: &[RespValue],
        index: usize,
        kind: PubSubMessageType,
    ) -> RedisResult<C::Value> {
        let item = items.get(index).ok_or_else(|| {
            RedisError::Protocol(format!("{} push is missing element {index}", kind.as_str()))
        })?;
        Ok(self.codec.decode_value(&item.as_bytes()?))
    }

    fn parse(
        &self,
        kind: PubSubMessageType,
        items: &[RespValue],
    ) -> RedisResult<PubSubMessage<C::Key, C::Value>> {
        let count = |index: usize| items.get(index).map_or(Ok(0), RespValue::as_int);
        Ok(match kind {
            PubSubMessageType::Subscribe => PubSubMessage::Subscribe {
                channel: self.key_at(items, 1, kind)?,
                count: count(2)?,
            },
            PubSubMessageType::PSubscribe => PubSubMessage::PSubscribe {
                pattern: self.key_at(items, 1, kind)?,
                count: count(2)?,
            },
            PubSubMessageType::Unsubscribe => PubSubMessage::Unsubscribe {
                channel: self.optional_key_at(items, 1)?,
                count: count(2)?,
            },
            PubSubMessageType::PUnsubscribe => PubSubMessage::PUnsubscribe {
                pattern: self.optional_key_at(items, 1)?,
                count: count(2)?,
            },
            PubSubMessageType::Message => PubSubMessage::Message {
                channel: self.key_at(items, 1, kind)?,
                payload: self.value_at(items, 2, kind)?,
            },
            PubSubMessageType::PMessage => PubSubMessage::PMessage {
                pattern: self.key_at(items, 1, kind)?,
                channel: self.key_at(items, 2, kind)?,
                payload: self.value_at(items, 3, kind)?,
            },
        })
    }

    /// Route a decoded reply: push frames are dispatched, anything else
    /// completes the oldest queued command.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Desync`] for a non-push reply with no command
    /// pending, and [`RedisError::Protocol`] for a push that lacks required
    /// elements. Both leave the connection unusable.
    pub fn notify_reply(&self, value: RespValue) -> RedisResult<()> {
        let Some(kind) = PubSubMessageType::classify(&value) else {
            return self.endpoint.notify_reply(value);
        };
        let RespValue::Array(items) = value else {
            return Ok(());
        };
        let message = self.parse(kind, &items).map_err(|e| {
            error!(
                endpoint = self.endpoint.id(),
                kind = kind.as_str(),
                error = %e,
                "Malformed pub/sub push"
            );
            if matches!(e, RedisError::Protocol(_)) {
                e
            } else {
                RedisError::Protocol(format!("Malformed {} push: {e}", kind.as_str()))
            }
        })?;
        self.notify_message(message);
        Ok(())
    }

    fn resubscribe(&self) {
        let channels = self.channels();
        let patterns = self.patterns();
        if !channels.is_empty() {
            if let Err(e) = self.send("SUBSCRIBE", &channels) {
                warn!(
                    endpoint = self.endpoint.id(),
                    error = %e,
                    "Failed to restore channel subscriptions"
                );
            }
        }
        if !patterns.is_empty() {
            if let Err(e) = self.send("PSUBSCRIBE", &patterns) {
                warn!(
                    endpoint = self.endpoint.id(),
                    error = %e,
                    "Failed to restore pattern subscriptions"
                );
            }
        }
    }
}

impl<C: RedisCodec> ConnectionEvents for PubSubEndpoint<C> {
    fn notify_connected(&self, transport: Arc<dyn Transport>) {
        self.endpoint.notify_connected(transport);
        if self.endpoint.is_connected() {
            self.resubscribe();
        }
    }

    fn notify_reply(&self, value: RespValue) -> RedisResult<()> {
        Self::notify_reply(self, value)
    }

    fn notify_disconnected(&self, cause: RedisError) {
        self.endpoint.notify_disconnected(cause);
    }

    fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }

    fn close(&self) {
        self.endpoint.close();
        *self.listeners.write() = Arc::new(Vec::new());
    }
}

/// Listener forwarding every event into a [`PubSubStream`]
struct ChannelListener<K, V> {
    tx: mpsc::UnboundedSender<PubSubMessage<K, V>>,
}

impl<K, V> ChannelListener<K, V> {
    fn forward(&self, message: PubSubMessage<K, V>) {
        // A closed receiver only means the stream is being dropped.
        let _ = self.tx.send(message);
    }
}

impl<K, V> RedisPubSubListener<K, V> for ChannelListener<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn message(&self, channel: &K, message: &V) {
        self.forward(PubSubMessage::Message {
            channel: channel.clone(),
            payload: message.clone(),
        });
    }

    fn pmessage(&self, pattern: &K, channel: &K, message: &V) {
        self.forward(PubSubMessage::PMessage {
            pattern: pattern.clone(),
            channel: channel.clone(),
            payload: message.clone(),
        });
    }

    fn subscribed(&self, channel: &K, count: i64) {
        self.forward(PubSubMessage::Subscribe {
            channel: channel.clone(),
            count,
        });
    }

    fn psubscribed(&self, pattern: &K, count: i64) {
        self.forward(PubSubMessage::PSubscribe {
            pattern: pattern.clone(),
            count,
        });
    }

    fn unsubscribed(&self, channel: Option<&K>, count: i64) {
        self.forward(PubSubMessage::Unsubscribe {
            channel: channel.cloned(),
            count,
        });
    }

    fn punsubscribed(&self, pattern: Option<&K>, count: i64) {
        self.forward(PubSubMessage::PUnsubscribe {
            pattern: pattern.cloned(),
            count,
        });
    }
}

/// Stream of pub/sub events, created by [`PubSubEndpoint::messages`].
///
/// Ends when the endpoint is closed.
pub struct PubSubStream<C: RedisCodec> {
    rx: mpsc::UnboundedReceiver<PubSubMessage<C::Key, C::Value>>,
    endpoint: Weak<PubSubEndpoint<C>>,
    listener: Weak<dyn RedisPubSubListener<C::Key, C::Value>>,
}

impl<C: RedisCodec> Stream for PubSubStream<C> {
    type Item = PubSubMessage<C::Key, C::Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<C: RedisCodec> Drop for PubSubStream<C> {
    fn drop(&mut self) {
        let endpoint = self.endpoint.upgrade();
        if let (Some(endpoint), Some(listener)) = (endpoint, self.listener.upgrade()) {
            endpoint.remove_listener(&listener);
        }
    }
}
