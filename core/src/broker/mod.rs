//! # RelayMQ Broker Module
//!
//! TCP front end of the broker.
//!
//! - [`server`] - accept loop, per-connection framing and graceful shutdown
//! - [`handler`] - applies decoded [`Command`](crate::protocol::Command)s to the virtual
//!   host and pushes deliveries back to consumer channels
//!
//! Each connection reads one frame at a time, runs the command on the blocking pool and
//! queues the reply on the connection's writer task. A consumer's tag is the channel id
//! it was created on, so deliveries find their way back through the same writer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relaymq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> relaymq::Result<()> {
//!     let config = BrokerConfig {
//!         port: 9090,
//!         data_dir: "./data".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let server = BrokerServer::bind(config).await?;
//!     server.run().await
//! }
//! ```

pub mod handler;
pub mod server;

pub use handler::*;
pub use server::*;
