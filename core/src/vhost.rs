//! The virtual host: command surface of the broker.
//!
//! Every exchange and queue name given to a command is prefixed with the virtual host
//! name before lookup. Commands return `Ok(false)` when the request is invalid (bad key,
//! missing entity, duplicate binding) and `Err` when storage fails underneath them.
//!
//! Durable definitions reach the disk before the in-memory index, so memory never
//! claims a durable entity the disk does not have.

use crate::config::BrokerConfig;
use crate::consumer::ConsumerManager;
use crate::index::MemoryIndex;
use crate::metrics::BrokerMetrics;
use crate::model::{
    Arguments, BasicProperties, Binding, Consumer, ConsumerEnv, Exchange, ExchangeType, Message,
    MsgQueue,
};
use crate::router;
use crate::storage::{self, DiskStore};
use crate::{RelaymqError, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared between the command path and the delivery workers
pub(crate) struct HostState {
    pub(crate) index: MemoryIndex,
    pub(crate) disk: DiskStore,
    pub(crate) metrics: Arc<BrokerMetrics>,
}

impl HostState {
    /// Removes an acknowledged message from disk (when it was written there), from the
    /// message index and from the queue's unacknowledged set.
    ///
    /// Only a message delivered from `queue_name` and not yet acknowledged can be acked.
    pub(crate) fn acknowledge(&self, queue_name: &str, message_id: &str) -> Result<bool> {
        let Some(queue) = self.index.get_queue(queue_name) else {
            warn!("Ack for unknown queue {}", queue_name);
            return Ok(false);
        };
        let Some(message) = self.index.remove_unacked(queue_name, message_id) else {
            warn!(
                "Ack for message {} which is not awaiting ack in queue {}",
                message_id, queue_name
            );
            return Ok(false);
        };

        if message.is_persistent() && queue.durable {
            match self.disk.delete_message(queue_name, &message) {
                Ok(true) => self.metrics.record_compaction(),
                Ok(false) => {}
                Err(e) => {
                    self.index.add_unacked(queue_name, message);
                    return Err(e);
                }
            }
        }
        self.index.remove_message(message_id);
        self.metrics.record_ack();

        debug!("Acknowledged message {} in queue {}", message_id, queue_name);
        Ok(true)
    }
}

pub struct VirtualHost {
    name: String,
    state: Arc<HostState>,
    consumers: ConsumerManager,
}

impl VirtualHost {
    /// Opens the data directory, rebuilds state from it and starts consumer dispatch
    pub fn open(config: &BrokerConfig) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(BrokerMetrics::new()))
    }

    pub fn open_with_metrics(config: &BrokerConfig, metrics: Arc<BrokerMetrics>) -> Result<Self> {
        config.validate().map_err(RelaymqError::Config)?;

        let disk = DiskStore::open(config)?;
        let index = MemoryIndex::new();
        index.recover(&disk)?;

        let state = Arc::new(HostState {
            index,
            disk,
            metrics,
        });
        let consumers = ConsumerManager::new(Arc::clone(&state), config.worker_threads)?;

        info!(
            "Virtual host {} ready with data in {}",
            config.virtual_host, config.data_dir
        );
        Ok(Self {
            name: config.virtual_host.clone(),
            state,
            consumers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal name of a user-visible exchange or queue name
    pub fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.name, name)
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.state.index
    }

    pub fn disk(&self) -> &DiskStore {
        &self.state.disk
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.state.metrics)
    }

    pub fn exchange_declare(
        &self,
        exchange_name: &str,
        exchange_type: ExchangeType,
        durable: bool,
        auto_delete: bool,
        arguments: Arguments,
    ) -> Result<bool> {
        let exchange_name = self.qualify(exchange_name);
        let index = &self.state.index;
        let _guard = index.lock_exchanges();

        if index.get_exchange(&exchange_name).is_some() {
            debug!("Exchange {} already exists", exchange_name);
            return Ok(true);
        }

        let exchange = Exchange {
            name: exchange_name,
            exchange_type,
            durable,
            auto_delete,
            arguments,
        };
        if durable {
            self.state.disk.insert_exchange(&exchange)?;
        }
        let exchange = index.insert_exchange(exchange);
        info!("Declared {} exchange {}", exchange.exchange_type, exchange.name);
        Ok(true)
    }

    pub fn exchange_delete(&self, exchange_name: &str) -> Result<bool> {
        let exchange_name = self.qualify(exchange_name);
        let index = &self.state.index;
        let _guard = index.lock_exchanges();

        let Some(exchange) = index.get_exchange(&exchange_name) else {
            warn!("Cannot delete missing exchange {}", exchange_name);
            return Ok(false);
        };
        if exchange.durable {
            self.state.disk.delete_exchange(&exchange_name)?;
        }
        index.delete_exchange(&exchange_name);
        info!("Deleted exchange {}", exchange_name);
        Ok(true)
    }

    pub fn queue_declare(
        &self,
        queue_name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: Arguments,
    ) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        if !storage::is_safe_queue_name(&queue_name) {
            warn!("Queue name {:?} cannot name a log directory", queue_name);
            return Ok(false);
        }
        let index = &self.state.index;
        let _guard = index.lock_queues();

        if index.get_queue(&queue_name).is_some() {
            debug!("Queue {} already exists", queue_name);
            return Ok(true);
        }

        let queue = MsgQueue::new(queue_name, durable, exclusive, auto_delete, arguments);
        if durable {
            self.state.disk.insert_queue(&queue)?;
        }
        let queue = index.insert_queue(queue);
        info!(
            "Declared {} queue {}",
            if queue.durable { "durable" } else { "transient" },
            queue.name
        );
        Ok(true)
    }

    pub fn queue_delete(&self, queue_name: &str) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        let index = &self.state.index;
        let _guard = index.lock_queues();

        let Some(queue) = index.get_queue(&queue_name) else {
            warn!("Cannot delete missing queue {}", queue_name);
            return Ok(false);
        };
        if queue.durable {
            self.state.disk.delete_queue(&queue_name)?;
        }
        index.delete_queue(&queue_name);
        info!("Deleted queue {}", queue_name);
        Ok(true)
    }

    pub fn queue_bind(
        &self,
        queue_name: &str,
        exchange_name: &str,
        binding_key: &str,
    ) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        let exchange_name = self.qualify(exchange_name);
        let index = &self.state.index;
        let (_exchanges, _queues) = index.lock_exchanges_then_queues();

        if index.get_binding(&exchange_name, &queue_name).is_some() {
            warn!("Binding {} -> {} already exists", exchange_name, queue_name);
            return Ok(false);
        }
        if !router::check_binding_key(binding_key) {
            warn!("Invalid binding key {:?}", binding_key);
            return Ok(false);
        }
        let Some(queue) = index.get_queue(&queue_name) else {
            warn!("Cannot bind missing queue {}", queue_name);
            return Ok(false);
        };
        let Some(exchange) = index.get_exchange(&exchange_name) else {
            warn!("Cannot bind to missing exchange {}", exchange_name);
            return Ok(false);
        };

        let binding = Binding {
            exchange_name,
            queue_name,
            binding_key: binding_key.to_string(),
        };
        if queue.durable && exchange.durable {
            self.state.disk.insert_binding(&binding)?;
        }
        match index.insert_binding_if_absent(binding) {
            Ok(()) => {
                info!(
                    "Bound queue {} to exchange {} with key {:?}",
                    queue.name, exchange.name, binding_key
                );
                Ok(true)
            }
            Err(RelaymqError::BindingExists { exchange, queue }) => {
                warn!("Binding {} -> {} already exists", exchange, queue);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn queue_unbind(&self, queue_name: &str, exchange_name: &str) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        let exchange_name = self.qualify(exchange_name);
        let index = &self.state.index;
        let (_exchanges, _queues) = index.lock_exchanges_then_queues();

        if index.get_binding(&exchange_name, &queue_name).is_none() {
            warn!(
                "Cannot unbind missing binding {} -> {}",
                exchange_name, queue_name
            );
            return Ok(false);
        }
        self.state.disk.delete_binding(&exchange_name, &queue_name)?;
        index.delete_binding(&exchange_name, &queue_name);
        info!("Unbound queue {} from exchange {}", queue_name, exchange_name);
        Ok(true)
    }

    /// Routes a message through the exchange.
    ///
    /// Succeeds even when no queue receives the message; only an invalid routing key or
    /// a missing exchange fails.
    pub fn basic_publish(
        &self,
        exchange_name: &str,
        routing_key: &str,
        properties: Option<BasicProperties>,
        body: impl Into<Bytes>,
    ) -> Result<bool> {
        let exchange_name = self.qualify(exchange_name);
        if !router::check_routing_key(routing_key) {
            warn!("Invalid routing key {:?}", routing_key);
            return Ok(false);
        }
        let Some(exchange) = self.state.index.get_exchange(&exchange_name) else {
            warn!("Cannot publish to missing exchange {}", exchange_name);
            return Ok(false);
        };
        let body = body.into();
        self.state.metrics.record_published();

        match exchange.exchange_type {
            ExchangeType::Direct => {
                let queue_name = self.qualify(routing_key);
                match self.state.index.get_queue(&queue_name) {
                    Some(queue) => {
                        self.send_message(&queue, Message::new(routing_key, properties, body))?;
                    }
                    None => debug!(
                        "No queue {} behind direct exchange {}, message dropped",
                        queue_name, exchange_name
                    ),
                }
            }
            ExchangeType::Fanout | ExchangeType::Topic => {
                for binding in self.state.index.get_bindings(&exchange_name) {
                    let Some(queue) = self.state.index.get_queue(&binding.queue_name) else {
                        warn!(
                            "Exchange {} is bound to missing queue {}",
                            exchange_name, binding.queue_name
                        );
                        continue;
                    };
                    let message = Message::new(routing_key, properties.clone(), body.clone());
                    if !router::route(exchange.exchange_type, &binding, &message)? {
                        continue;
                    }
                    self.send_message(&queue, message)?;
                }
            }
        }
        Ok(true)
    }

    fn send_message(&self, queue: &MsgQueue, mut message: Message) -> Result<()> {
        if message.is_persistent() && queue.durable {
            self.state.disk.append_message(&queue.name, &mut message)?;
        }
        debug!("Queued message {} on {}", message.id(), queue.name);
        self.state.index.enqueue(&queue.name, Arc::new(message));
        self.state.metrics.record_routed();
        self.consumers.notify(&queue.name)
    }

    /// Subscribes `consumer` to the queue; existing backlog is dispatched right away
    pub fn basic_consume(
        &self,
        consumer_tag: &str,
        queue_name: &str,
        auto_ack: bool,
        consumer: Arc<dyn Consumer>,
    ) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        let env = ConsumerEnv {
            consumer_tag: consumer_tag.to_string(),
            queue_name: queue_name.clone(),
            auto_ack,
            consumer,
        };
        match self.consumers.add_consumer(env) {
            Ok(()) => {
                info!("Consumer {} subscribed to queue {}", consumer_tag, queue_name);
                Ok(true)
            }
            Err(RelaymqError::QueueNotFound(name)) => {
                warn!("Cannot consume from missing queue {}", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn basic_ack(&self, queue_name: &str, message_id: &str) -> Result<bool> {
        self.state.acknowledge(&self.qualify(queue_name), message_id)
    }

    /// Stops delivering to `consumer_tag` on the queue
    pub fn basic_cancel(&self, queue_name: &str, consumer_tag: &str) -> Result<bool> {
        let queue_name = self.qualify(queue_name);
        let removed = self.consumers.remove_consumer(&queue_name, consumer_tag);
        if removed == 0 {
            warn!("No consumer {} on queue {} to cancel", consumer_tag, queue_name);
            return Ok(false);
        }
        info!("Cancelled consumer {} on queue {}", consumer_tag, queue_name);
        Ok(true)
    }

    /// Removes the consumer tag from every queue, returning how many subscriptions ended
    pub fn cancel_consumer_tag(&self, consumer_tag: &str) -> usize {
        let removed: usize = self
            .state
            .index
            .queues()
            .iter()
            .map(|queue| queue.remove_consumer(consumer_tag))
            .sum();
        if removed > 0 {
            info!("Cancelled {} subscriptions of consumer {}", removed, consumer_tag);
        }
        removed
    }
}
