//! # RelayMQ Consumer Coordination
//!
//! Delivers queued messages to subscribed consumers.
//!
//! ## Overview
//!
//! Every enqueue pushes the queue's name onto a token channel. A dedicated dispatcher
//! thread takes tokens one at a time and, for the named queue, picks the next consumer
//! in round-robin order together with the oldest backlog message. The pair is handed to
//! a [`WorkerPool`](pool::WorkerPool), where the delivery task:
//!
//! 1. moves the message into the queue's unacknowledged set,
//! 2. invokes the consumer callback with `(consumer_tag, properties, body)`,
//! 3. acknowledges the message itself when the consumer uses auto-ack.
//!
//! Tokens may outnumber messages; a token that finds no consumer or no message is a
//! no-op. A callback error is logged and the message stays unacknowledged.
//!
//! Adding a consumer to a queue with a backlog dispatches up to the backlog size
//! immediately instead of waiting for the next publish.

pub mod pool;


use crate::model::{ConsumerEnv, Message};
use crate::vhost::HostState;
use crate::{RelaymqError, Result};
use crossbeam::channel;
use pool::WorkerPool;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace, warn};

pub struct ConsumerManager {
    state: Arc<HostState>,
    token_tx: channel::Sender<String>,
    pool: Arc<WorkerPool>,
}

impl ConsumerManager {
    /// Starts the dispatcher thread and a delivery pool of `worker_threads` workers
    pub(crate) fn new(state: Arc<HostState>, worker_threads: usize) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(worker_threads, "relaymq-delivery")?);
        let (token_tx, token_rx) = channel::unbounded::<String>();

        let dispatcher_state = Arc::clone(&state);
        let dispatcher_pool = Arc::clone(&pool);
        thread::Builder::new()
            .name("relaymq-dispatcher".to_string())
            .spawn(move || {
                while let Ok(queue_name) = token_rx.recv() {
                    if let Err(e) = dispatch(&dispatcher_state, &dispatcher_pool, &queue_name) {
                        error!("Dispatch for queue {} failed: {}", queue_name, e);
                    }
                }
                debug!("Dispatcher stopped");
            })?;

        Ok(Self {
            state,
            token_tx,
            pool,
        })
    }

    /// Signals that `queue_name` may have a message to deliver
    pub fn notify(&self, queue_name: &str) -> Result<()> {
        self.token_tx
            .send(queue_name.to_string())
            .map_err(|_| RelaymqError::Shutdown("dispatcher is not running".to_string()))
    }

    /// Registers the consumer and drains whatever backlog the queue already holds
    pub fn add_consumer(&self, consumer: ConsumerEnv) -> Result<()> {
        let queue_name = consumer.queue_name.clone();
        let queue = self
            .state
            .index
            .get_queue(&queue_name)
            .ok_or_else(|| RelaymqError::QueueNotFound(queue_name.clone()))?;

        queue.add_consumer(consumer);
        let pending = self.state.index.backlog_len(&queue_name);
        for _ in 0..pending {
            if !dispatch(&self.state, &self.pool, &queue_name)? {
                break;
            }
        }
        Ok(())
    }

    /// Removes the consumer tag from the queue's rotation, returning how many entries went
    pub fn remove_consumer(&self, queue_name: &str, consumer_tag: &str) -> usize {
        self.state
            .index
            .get_queue(queue_name)
            .map(|queue| queue.remove_consumer(consumer_tag))
            .unwrap_or(0)
    }
}

/// One dispatch step for `queue_name`; returns whether a delivery was submitted
fn dispatch(state: &Arc<HostState>, pool: &WorkerPool, queue_name: &str) -> Result<bool> {
    let Some(queue) = state.index.get_queue(queue_name) else {
        debug!("Token for queue {} which no longer exists", queue_name);
        return Ok(false);
    };

    let Some((consumer, message)) =
        queue.next_consumer_with(|| state.index.poll_message(queue_name))
    else {
        trace!("Nothing to dispatch for queue {}", queue_name);
        return Ok(false);
    };

    let task_state = Arc::clone(state);
    let message_id = message.id().to_string();
    if let Err(e) = pool.execute(move || deliver(&task_state, &consumer, message)) {
        warn!(
            "Message {} of queue {} was taken off the backlog but could not be delivered",
            message_id, queue_name
        );
        return Err(e);
    }
    Ok(true)
}

fn deliver(state: &HostState, consumer: &ConsumerEnv, message: Arc<Message>) {
    let queue_name = consumer.queue_name.as_str();
    state.index.add_unacked(queue_name, Arc::clone(&message));

    match consumer.consumer.handle_delivery(
        &consumer.consumer_tag,
        &message.properties,
        &message.body,
    ) {
        Ok(()) => {
            state.metrics.record_delivery();
            debug!(
                "Delivered message {} of queue {} to {}",
                message.id(),
                queue_name,
                consumer.consumer_tag
            );
            if consumer.auto_ack {
                match state.acknowledge(queue_name, message.id()) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "Auto-ack found message {} of queue {} already gone",
                        message.id(),
                        queue_name
                    ),
                    Err(e) => error!(
                        "Auto-ack of message {} in queue {} failed: {}",
                        message.id(),
                        queue_name,
                        e
                    ),
                }
            }
        }
        Err(e) => {
            state.metrics.record_delivery_failure();
            error!(
                "Consumer {} failed on message {} of queue {}, left unacknowledged: {}",
                consumer.consumer_tag,
                message.id(),
                queue_name,
                e
            );
        }
    }
}
