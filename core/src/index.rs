//! Authoritative in-memory broker state for one virtual host.
//!
//! Maps are concurrent and safe for independent reads and inserts. Compound mutations
//! of exchanges and queues are serialized by two coarse locks; whenever both are needed
//! the exchange lock is taken first, which [`MemoryIndex::lock_exchanges_then_queues`]
//! encodes so callers cannot get the order wrong.

use crate::model::{Binding, Exchange, Message, MsgQueue};
use crate::storage::DiskStore;
use crate::{RelaymqError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

type Backlog = Arc<Mutex<VecDeque<Arc<Message>>>>;
type Unacked = Arc<Mutex<HashMap<String, Arc<Message>>>>;

#[derive(Default)]
pub struct MemoryIndex {
    exchanges: DashMap<String, Arc<Exchange>>,
    queues: DashMap<String, Arc<MsgQueue>>,
    /// exchange name -> queue name -> binding
    bindings: DashMap<String, HashMap<String, Binding>>,
    messages: DashMap<String, Arc<Message>>,
    backlogs: DashMap<String, Backlog>,
    unacked: DashMap<String, Unacked>,

    exchange_lock: Mutex<()>,
    queue_lock: Mutex<()>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_exchanges(&self) -> MutexGuard<'_, ()> {
        self.exchange_lock.lock()
    }

    pub fn lock_queues(&self) -> MutexGuard<'_, ()> {
        self.queue_lock.lock()
    }

    /// Both mutation domains, exchange first
    pub fn lock_exchanges_then_queues(&self) -> (MutexGuard<'_, ()>, MutexGuard<'_, ()>) {
        let exchanges = self.exchange_lock.lock();
        let queues = self.queue_lock.lock();
        (exchanges, queues)
    }

    // Exchanges

    pub fn insert_exchange(&self, exchange: Exchange) -> Arc<Exchange> {
        let exchange = Arc::new(exchange);
        self.exchanges
            .insert(exchange.name.clone(), Arc::clone(&exchange));
        exchange
    }

    pub fn get_exchange(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn delete_exchange(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.remove(name).map(|(_, e)| e)
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    // Queues

    pub fn insert_queue(&self, queue: MsgQueue) -> Arc<MsgQueue> {
        let queue = Arc::new(queue);
        self.queues.insert(queue.name.clone(), Arc::clone(&queue));
        queue
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<MsgQueue>> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    /// Removes the queue along with its backlog, unacknowledged set and their index
    /// entries. Bindings that name the queue are left alone.
    pub fn delete_queue(&self, name: &str) -> Option<Arc<MsgQueue>> {
        let queue = self.queues.remove(name).map(|(_, q)| q)?;

        if let Some((_, backlog)) = self.backlogs.remove(name) {
            for message in backlog.lock().drain(..) {
                self.messages.remove(message.id());
            }
        }
        if let Some((_, unacked)) = self.unacked.remove(name) {
            for (id, _) in unacked.lock().drain() {
                self.messages.remove(&id);
            }
        }
        Some(queue)
    }

    pub fn queues(&self) -> Vec<Arc<MsgQueue>> {
        self.queues.iter().map(|q| Arc::clone(q.value())).collect()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    // Bindings

    /// Inserts the binding unless the (exchange, queue) pair is already bound
    pub fn insert_binding_if_absent(&self, binding: Binding) -> Result<()> {
        let mut by_queue = self.bindings.entry(binding.exchange_name.clone()).or_default();
        match by_queue.entry(binding.queue_name.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => Err(RelaymqError::BindingExists {
                exchange: binding.exchange_name,
                queue: binding.queue_name,
            }),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(binding);
                Ok(())
            }
        }
    }

    pub fn get_binding(&self, exchange_name: &str, queue_name: &str) -> Option<Binding> {
        self.bindings
            .get(exchange_name)
            .and_then(|by_queue| by_queue.get(queue_name).cloned())
    }

    /// Snapshot of every binding on the exchange
    pub fn get_bindings(&self, exchange_name: &str) -> Vec<Binding> {
        self.bindings
            .get(exchange_name)
            .map(|by_queue| by_queue.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn delete_binding(&self, exchange_name: &str, queue_name: &str) -> Option<Binding> {
        match self.bindings.entry(exchange_name.to_string()) {
            Entry::Occupied(mut by_queue) => {
                let removed = by_queue.get_mut().remove(queue_name);
                if by_queue.get().is_empty() {
                    by_queue.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    // Messages

    pub fn get_message(&self, id: &str) -> Option<Arc<Message>> {
        self.messages.get(id).map(|m| Arc::clone(m.value()))
    }

    pub fn remove_message(&self, id: &str) -> Option<Arc<Message>> {
        self.messages.remove(id).map(|(_, m)| m)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn backlog(&self, queue_name: &str) -> Backlog {
        self.backlogs
            .entry(queue_name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn unacked(&self, queue_name: &str) -> Unacked {
        self.unacked
            .entry(queue_name.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Indexes the message and appends it to the tail of the queue's backlog
    pub fn enqueue(&self, queue_name: &str, message: Arc<Message>) {
        self.messages
            .insert(message.id().to_string(), Arc::clone(&message));
        self.backlog(queue_name).lock().push_back(message);
    }

    /// Takes the oldest message off the queue's backlog
    pub fn poll_message(&self, queue_name: &str) -> Option<Arc<Message>> {
        let backlog = self.backlogs.get(queue_name).map(|b| Arc::clone(b.value()))?;
        let message = backlog.lock().pop_front();
        message
    }

    pub fn backlog_len(&self, queue_name: &str) -> usize {
        self.backlogs
            .get(queue_name)
            .map(|b| b.lock().len())
            .unwrap_or(0)
    }

    pub fn add_unacked(&self, queue_name: &str, message: Arc<Message>) {
        self.unacked(queue_name)
            .lock()
            .insert(message.id().to_string(), message);
    }

    pub fn remove_unacked(&self, queue_name: &str, id: &str) -> Option<Arc<Message>> {
        let unacked = self.unacked.get(queue_name).map(|u| Arc::clone(u.value()))?;
        let removed = unacked.lock().remove(id);
        removed
    }

    pub fn get_unacked(&self, queue_name: &str, id: &str) -> Option<Arc<Message>> {
        let unacked = self.unacked.get(queue_name).map(|u| Arc::clone(u.value()))?;
        let found = unacked.lock().get(id).cloned();
        found
    }

    pub fn unacked_len(&self, queue_name: &str) -> usize {
        self.unacked
            .get(queue_name)
            .map(|u| u.lock().len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.exchanges.clear();
        self.queues.clear();
        self.bindings.clear();
        self.messages.clear();
        self.backlogs.clear();
        self.unacked.clear();
    }

    /// Rebuilds all state from the definition store and the durable queue logs.
    ///
    /// Messages that were delivered but never acknowledged come back as backlog.
    pub fn recover(&self, disk: &DiskStore) -> Result<()> {
        let (_exchanges, _queues) = self.lock_exchanges_then_queues();
        self.clear();

        for exchange in disk.select_all_exchanges()? {
            self.insert_exchange(exchange);
        }

        let mut restored = 0usize;
        for queue in disk.select_all_queues()? {
            let name = queue.name.clone();
            let durable = queue.durable;
            self.insert_queue(queue);
            if !durable {
                continue;
            }
            if !disk.messages().files_exist(&name) {
                warn!("Durable queue {} has no log files, recreating them", name);
                disk.messages().create_queue_files(&name)?;
                continue;
            }
            for message in disk.load_messages(&name)? {
                self.enqueue(&name, Arc::new(message));
                restored += 1;
            }
        }

        for binding in disk.select_all_bindings()? {
            self.insert_binding_if_absent(binding)?;
        }

        info!(
            "Recovered {} exchanges, {} queues and {} messages",
            self.exchange_count(),
            self.queue_count(),
            restored
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::model::{Arguments, ExchangeType, PERSISTENT};
    use tempfile::tempdir;

    fn binding(exchange: &str, queue: &str, key: &str) -> Binding {
        Binding {
            exchange_name: exchange.to_string(),
            queue_name: queue.to_string(),
            binding_key: key.to_string(),
        }
    }

    #[test]
    fn test_binding_conflict() {
        let index = MemoryIndex::new();
        index.insert_binding_if_absent(binding("ex", "q", "a")).unwrap();
        let err = index
            .insert_binding_if_absent(binding("ex", "q", "b"))
            .unwrap_err();
        assert!(matches!(err, RelaymqError::BindingExists { .. }));
        assert_eq!(index.get_binding("ex", "q").unwrap().binding_key, "a");

        index.insert_binding_if_absent(binding("ex", "q2", "a")).unwrap();
        assert_eq!(index.get_bindings("ex").len(), 2);

        assert!(index.delete_binding("ex", "q").is_some());
        assert!(index.delete_binding("ex", "q").is_none());
        assert!(index.delete_binding("other", "q").is_none());
    }

    #[test]
    fn test_backlog_is_fifo() {
        let index = MemoryIndex::new();
        let first = Arc::new(Message::new("k", None, "1"));
        let second = Arc::new(Message::new("k", None, "2"));
        index.enqueue("q", Arc::clone(&first));
        index.enqueue("q", Arc::clone(&second));

        assert_eq!(index.backlog_len("q"), 2);
        assert_eq!(index.message_count(), 2);
        assert_eq!(index.poll_message("q").unwrap().id(), first.id());
        assert_eq!(index.poll_message("q").unwrap().id(), second.id());
        assert!(index.poll_message("q").is_none());
        assert!(index.poll_message("unknown").is_none());
    }

    #[test]
    fn test_delete_queue_drops_its_messages() {
        let index = MemoryIndex::new();
        index.insert_queue(MsgQueue::new("q", false, false, false, Arguments::new()));
        let waiting = Arc::new(Message::new("k", None, "a"));
        let inflight = Arc::new(Message::new("k", None, "b"));
        index.enqueue("q", Arc::clone(&waiting));
        index.enqueue("q", Arc::clone(&inflight));
        let polled = index.poll_message("q").unwrap();
        index.add_unacked("q", polled);
        index.insert_binding_if_absent(binding("ex", "q", "")).unwrap();

        assert!(index.delete_queue("q").is_some());
        assert_eq!(index.message_count(), 0);
        assert_eq!(index.backlog_len("q"), 0);
        assert_eq!(index.unacked_len("q"), 0);
        // Bindings do not cascade
        assert!(index.get_binding("ex", "q").is_some());
        assert!(index.delete_queue("q").is_none());
    }

    #[test]
    fn test_unacked_tracking() {
        let index = MemoryIndex::new();
        let message = Arc::new(Message::new("k", None, "a"));
        index.add_unacked("q", Arc::clone(&message));
        assert!(index.get_unacked("q", message.id()).is_some());
        assert_eq!(index.unacked_len("q"), 1);
        assert!(index.remove_unacked("q", message.id()).is_some());
        assert!(index.remove_unacked("q", message.id()).is_none());
    }

    #[test]
    fn test_recover_restores_definitions_and_backlog() {
        let dir = tempdir().unwrap();
        let config = BrokerConfig::default()
            .with_data_dir(dir.path().to_string_lossy())
            .with_virtual_host("v");
        let disk = DiskStore::open(&config).unwrap();

        let exchange = Exchange {
            name: "vex".to_string(),
            exchange_type: ExchangeType::Topic,
            durable: true,
            auto_delete: false,
            arguments: Arguments::new(),
        };
        let queue = MsgQueue::new("vq", true, false, false, Arguments::new());
        disk.insert_exchange(&exchange).unwrap();
        disk.insert_queue(&queue).unwrap();
        disk.insert_binding(&binding("vex", "vq", "a.*")).unwrap();

        let mut props = crate::model::BasicProperties::default();
        props.delivery_mode = PERSISTENT;
        let mut message = Message::new("a.b", Some(props), "body");
        disk.append_message("vq", &mut message).unwrap();

        let index = MemoryIndex::new();
        index.enqueue("stale", Arc::new(Message::new("k", None, "x")));
        index.recover(&disk).unwrap();

        assert_eq!(*index.get_exchange("vex").unwrap(), exchange);
        assert!(index.get_exchange("v").is_some());
        assert_eq!(*index.get_queue("vq").unwrap(), queue);
        assert_eq!(index.get_binding("vex", "vq").unwrap().binding_key, "a.*");
        assert_eq!(index.backlog_len("stale"), 0);
        assert_eq!(index.backlog_len("vq"), 1);
        let restored = index.poll_message("vq").unwrap();
        assert_eq!(restored.id(), message.id());
        assert_eq!(&restored.body[..], b"body");
        assert!(index.get_message(message.id()).is_some());
    }
}
