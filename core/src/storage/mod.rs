//! # RelayMQ Storage Module
//!
//! Durable state lives in two places under the configured data directory:
//!
//! ```text
//! <data_dir>/meta.db                      exchange / queue / binding definitions
//! <data_dir>/<queue>/queue_data.txt       length-prefixed message records
//! <data_dir>/<queue>/queue_stat.txt       "<total>\t<valid>"
//! ```
//!
//! Acknowledged messages are invalidated in place; once a log is large and mostly
//! invalid it is compacted by rewriting the valid records into a new file that replaces
//! the old one with an atomic rename.
//!
//! ## Modules
//!
//! - [`log`] - Per-queue append-only message logs
//! - [`meta`] - SQLite definition store

pub mod log;
pub mod meta;


pub use log::{is_safe_queue_name, CompactionPolicy, MessageRecord, MessageStore, QueueStat};
pub use meta::MetaStore;

use crate::config::BrokerConfig;
use crate::model::{Binding, Exchange, Message, MsgQueue};
use crate::Result;
use tracing::debug;

/// Facade over the definition store and the message logs
pub struct DiskStore {
    meta: MetaStore,
    messages: MessageStore,
}

impl DiskStore {
    /// Opens the data directory; a new metadata database gets the virtual host's default
    /// exchange, whose user-visible name is empty.
    pub fn open(config: &BrokerConfig) -> Result<Self> {
        let meta = MetaStore::open(&config.data_dir, &config.virtual_host)?;
        let messages = MessageStore::new(&config.data_dir, config.compaction_policy())?;
        Ok(Self { meta, messages })
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn insert_exchange(&self, exchange: &Exchange) -> Result<()> {
        self.meta.insert_exchange(exchange)
    }

    pub fn delete_exchange(&self, name: &str) -> Result<()> {
        self.meta.delete_exchange(name)
    }

    pub fn select_all_exchanges(&self) -> Result<Vec<Exchange>> {
        self.meta.select_all_exchanges()
    }

    pub fn insert_queue(&self, queue: &MsgQueue) -> Result<()> {
        self.messages.create_queue_files(&queue.name)?;
        self.meta.insert_queue(queue)
    }

    pub fn delete_queue(&self, name: &str) -> Result<()> {
        self.meta.delete_queue(name)?;
        self.messages.destroy_queue_files(name)
    }

    pub fn select_all_queues(&self) -> Result<Vec<MsgQueue>> {
        self.meta.select_all_queues()
    }

    pub fn insert_binding(&self, binding: &Binding) -> Result<()> {
        self.meta.insert_binding(binding)
    }

    pub fn delete_binding(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        self.meta.delete_binding(exchange_name, queue_name)
    }

    pub fn select_all_bindings(&self) -> Result<Vec<Binding>> {
        self.meta.select_all_bindings()
    }

    pub fn append_message(&self, queue_name: &str, message: &mut Message) -> Result<()> {
        self.messages.append(queue_name, message)
    }

    /// Invalidates the message record and compacts the log when it crosses the policy.
    ///
    /// Returns whether a compaction ran.
    pub fn delete_message(&self, queue_name: &str, message: &Message) -> Result<bool> {
        self.messages.logical_delete(queue_name, message)?;
        if self.messages.should_compact(queue_name)? {
            debug!("Queue {} log crossed the compaction threshold", queue_name);
            self.messages.compact(queue_name)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn load_messages(&self, queue_name: &str) -> Result<Vec<Message>> {
        self.messages.replay(queue_name)
    }
}
