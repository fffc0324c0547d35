//! Broker entities: exchanges, queues, bindings, messages and consumers.

use crate::{RelaymqError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque string-keyed options attached to exchanges and queues
pub type Arguments = HashMap<String, String>;

/// Delivery mode for messages that live in memory only
pub const TRANSIENT: u8 = 1;
/// Delivery mode for messages written to the queue log when the queue is durable
pub const PERSISTENT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeType {
    /// Routing key is taken as a literal queue name
    Direct,
    /// Every bound queue receives a copy
    Fanout,
    /// Binding keys with `*` / `#` wildcards are matched against the routing key
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "DIRECT",
            ExchangeType::Fanout => "FANOUT",
            ExchangeType::Topic => "TOPIC",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = RelaymqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(ExchangeType::Direct),
            "FANOUT" => Ok(ExchangeType::Fanout),
            "TOPIC" => Ok(ExchangeType::Topic),
            other => Err(RelaymqError::Corruption(format!(
                "unknown exchange type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub exchange_type: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

/// A consumer registered on a queue
#[derive(Clone)]
pub struct ConsumerEnv {
    pub consumer_tag: String,
    pub queue_name: String,
    pub auto_ack: bool,
    pub consumer: Arc<dyn Consumer>,
}

impl fmt::Debug for ConsumerEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerEnv")
            .field("consumer_tag", &self.consumer_tag)
            .field("queue_name", &self.queue_name)
            .field("auto_ack", &self.auto_ack)
            .finish()
    }
}

/// Delivery callback invoked by the worker pool for each dispatched message.
///
/// Returning an error leaves the message in the queue's unacknowledged set.
pub trait Consumer: Send + Sync {
    fn handle_delivery(
        &self,
        consumer_tag: &str,
        properties: &BasicProperties,
        body: &[u8],
    ) -> Result<()>;
}

impl<F> Consumer for F
where
    F: Fn(&str, &BasicProperties, &[u8]) -> Result<()> + Send + Sync,
{
    fn handle_delivery(
        &self,
        consumer_tag: &str,
        properties: &BasicProperties,
        body: &[u8],
    ) -> Result<()> {
        self(consumer_tag, properties, body)
    }
}

#[derive(Debug, Default)]
struct ConsumerRing {
    consumers: Vec<ConsumerEnv>,
    cursor: u64,
}

/// Queue definition plus its consumer rotation.
///
/// Messages are not owned here; the [`MemoryIndex`](crate::MemoryIndex) keeps the
/// backlog and unacknowledged set keyed by queue name.
#[derive(Debug)]
pub struct MsgQueue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
    ring: Mutex<ConsumerRing>,
}

impl MsgQueue {
    pub fn new(
        name: impl Into<String>,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: Arguments,
    ) -> Self {
        Self {
            name: name.into(),
            durable,
            exclusive,
            auto_delete,
            arguments,
            ring: Mutex::new(ConsumerRing::default()),
        }
    }

    pub fn add_consumer(&self, consumer: ConsumerEnv) {
        self.ring.lock().consumers.push(consumer);
    }

    /// Removes every consumer with the given tag, returning how many were removed
    pub fn remove_consumer(&self, consumer_tag: &str) -> usize {
        let mut ring = self.ring.lock();
        let before = ring.consumers.len();
        ring.consumers.retain(|c| c.consumer_tag != consumer_tag);
        before - ring.consumers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.ring.lock().consumers.len()
    }

    /// Round-robin selection paired with taking a message.
    ///
    /// `take` runs only when at least one consumer exists, and the cursor advances only
    /// when it yields a value, so each successful dispatch moves the rotation by one.
    pub fn next_consumer_with<T, F>(&self, take: F) -> Option<(ConsumerEnv, T)>
    where
        F: FnOnce() -> Option<T>,
    {
        let mut ring = self.ring.lock();
        if ring.consumers.is_empty() {
            return None;
        }
        let item = take()?;
        let idx = (ring.cursor % ring.consumers.len() as u64) as usize;
        ring.cursor = ring.cursor.wrapping_add(1);
        Some((ring.consumers[idx].clone(), item))
    }
}

/// Queues compare by definition; consumers are runtime state.
impl PartialEq for MsgQueue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
            && self.arguments == other.arguments
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub exchange_name: String,
    pub queue_name: String,
    pub binding_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicProperties {
    pub message_id: String,
    pub routing_key: String,
    pub delivery_mode: u8,
}

impl Default for BasicProperties {
    fn default() -> Self {
        Self {
            message_id: String::new(),
            routing_key: String::new(),
            delivery_mode: TRANSIENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub properties: BasicProperties,
    pub body: Bytes,
    /// `[offset_beg, offset_end)` of the record within its queue log
    pub offset_beg: u64,
    pub offset_end: u64,
    pub is_valid: bool,
}

impl Message {
    /// Creates a message with a fresh `M-<uuid>` id.
    ///
    /// Any id present in `properties` is replaced; the routing key always comes from
    /// the publish call.
    pub fn new(
        routing_key: impl Into<String>,
        properties: Option<BasicProperties>,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut properties = properties.unwrap_or_default();
        properties.message_id = format!("M-{}", Uuid::new_v4());
        properties.routing_key = routing_key.into();
        Self {
            properties,
            body: body.into(),
            offset_beg: 0,
            offset_end: 0,
            is_valid: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.properties.message_id
    }

    pub fn routing_key(&self) -> &str {
        &self.properties.routing_key
    }

    pub fn is_persistent(&self) -> bool {
        self.properties.delivery_mode == PERSISTENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_consumer(tag: &str) -> ConsumerEnv {
        ConsumerEnv {
            consumer_tag: tag.to_string(),
            queue_name: "q".to_string(),
            auto_ack: true,
            consumer: Arc::new(|_: &str, _: &BasicProperties, _: &[u8]| {
                Ok::<(), RelaymqError>(())
            }),
        }
    }

    #[test]
    fn test_message_ids_are_unique_and_prefixed() {
        let a = Message::new("k", None, "a");
        let b = Message::new("k", None, "b");
        assert!(a.id().starts_with("M-"));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.properties.delivery_mode, TRANSIENT);
        assert!(a.is_valid);
    }

    #[test]
    fn test_exchange_type_parse() {
        assert_eq!("topic".parse::<ExchangeType>().unwrap(), ExchangeType::Topic);
        assert_eq!(ExchangeType::Fanout.as_str(), "FANOUT");
        assert!("headers".parse::<ExchangeType>().is_err());
    }

    #[test]
    fn test_round_robin_cursor_only_moves_on_dispatch() {
        let queue = MsgQueue::new("q", false, false, false, Arguments::new());
        assert!(queue.next_consumer_with(|| Some(())).is_none());

        queue.add_consumer(noop_consumer("a"));
        queue.add_consumer(noop_consumer("b"));

        let (first, _) = queue.next_consumer_with(|| Some(1)).unwrap();
        assert!(queue.next_consumer_with(|| None::<i32>).is_none());
        let (second, _) = queue.next_consumer_with(|| Some(2)).unwrap();
        let (third, _) = queue.next_consumer_with(|| Some(3)).unwrap();

        assert_eq!(first.consumer_tag, "a");
        assert_eq!(second.consumer_tag, "b");
        assert_eq!(third.consumer_tag, "a");
    }

    #[test]
    fn test_remove_consumer() {
        let queue = MsgQueue::new("q", false, false, false, Arguments::new());
        queue.add_consumer(noop_consumer("a"));
        queue.add_consumer(noop_consumer("b"));
        assert_eq!(queue.remove_consumer("a"), 1);
        assert_eq!(queue.remove_consumer("a"), 0);
        assert_eq!(queue.consumer_count(), 1);
    }
}
