//! # RelayMQ Core Library
//!
//! RelayMQ is a single-node message broker built around exchanges, queues and bindings.
//! Producers publish to named exchanges, exchanges route to queues through bindings, and
//! consumers subscribe to queues and receive messages with at-least-once delivery.
//!
//! ## Architecture Overview
//!
//! - [`model`] - Exchange, queue, binding, message and consumer entities
//! - [`router`] - Routing/binding key grammar and topic wildcard matching
//! - [`index`] - Authoritative in-memory state, rebuilt from disk at startup
//! - [`storage`] - Append-only per-queue message logs and the SQLite metadata store
//! - [`consumer`] - Round-robin dispatch of queued messages onto a delivery worker pool
//! - [`vhost`] - The virtual host that sequences all of the above
//! - [`protocol`] - Frame codec and the typed command set carried over TCP
//! - [`broker`] - TCP server and per-connection command handling
//! - [`metrics`] - Lock-free broker counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaymq::{BrokerConfig, ExchangeType, VirtualHost};
//! use std::collections::HashMap;
//!
//! fn main() -> relaymq::Result<()> {
//!     let config = BrokerConfig::default();
//!     let vhost = VirtualHost::open(&config)?;
//!
//!     vhost.exchange_declare("orders", ExchangeType::Topic, true, false, HashMap::new())?;
//!     vhost.queue_declare("billing", true, false, false, HashMap::new())?;
//!     vhost.queue_bind("billing", "orders", "order.*.created")?;
//!     vhost.basic_publish("orders", "order.eu.created", None, b"hello".to_vec())?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod index;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod router;
pub mod storage;
pub mod vhost;

pub use broker::{BrokerServer, MessageHandler};
pub use config::BrokerConfig;
pub use consumer::ConsumerManager;
pub use index::MemoryIndex;
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use model::{
    Arguments, BasicProperties, Binding, Consumer, ConsumerEnv, Exchange, ExchangeType,
    Message, MsgQueue,
};
pub use protocol::{Command, Frame, FrameCodec, FrameType, Response};
pub use storage::{DiskStore, MessageStore, MetaStore, QueueStat};
pub use vhost::VirtualHost;

use thiserror::Error;

/// RelayMQ error types
///
/// Validation failures (bad key grammar, missing entity, duplicate binding) are not
/// errors: virtual host commands report them as `Ok(false)`. The variants below cover
/// I/O failures and data-consistency failures, which abort the current command.
#[derive(Debug, Error)]
pub enum RelaymqError {
    /// File I/O failures in the message log or data directory
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Metadata database failures
    #[error("Metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),

    /// JSON encoding of argument maps and metric snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding of wire payloads
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Configuration validation and parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frames and unknown command types
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// On-disk data that contradicts what the broker expects to find
    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Binding already exists: exchange={exchange}, queue={queue}")]
    BindingExists { exchange: String, queue: String },

    /// The router was asked to route for an exchange type it does not handle
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// A name that cannot be used where it was given, e.g. as a queue directory
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// A background component stopped accepting work
    #[error("Shutting down: {0}")]
    Shutdown(String),
}

/// Result type alias for RelayMQ operations
pub type Result<T> = std::result::Result<T, RelaymqError>;
