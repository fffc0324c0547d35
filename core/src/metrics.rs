//! # RelayMQ Metrics
//!
//! Lock-free broker counters updated on the message path with relaxed atomics, plus a
//! periodic report that logs a [`MetricsSnapshot`].
//!
//! ```rust,no_run
//! use relaymq::metrics::BrokerMetrics;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = Arc::new(BrokerMetrics::new());
//!     tokio::spawn(Arc::clone(&metrics).reporting_loop(Duration::from_secs(60)));
//!
//!     metrics.record_published();
//!     println!("{}", metrics.snapshot().to_json().unwrap());
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::info;

#[derive(Debug)]
pub struct BrokerMetrics {
    messages_published: AtomicU64,
    messages_routed: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    acks: AtomicU64,
    compactions: AtomicU64,
    active_connections: AtomicUsize,
    started: Instant,
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self {
            messages_published: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    /// One message placed on one queue
    pub fn record_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate instead of wrapping if open/close ever get out of step
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            active_connections: self.active_connections(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Logs a snapshot every `period` until the task is dropped
    pub async fn reporting_loop(self: Arc<Self>, period: Duration) {
        let mut interval = interval(period);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.report();
        }
    }

    fn report(&self) {
        let s = self.snapshot();
        info!("=== RelayMQ Metrics Report ===");
        info!(
            "Messages: {} published, {} routed, {} delivered, {} failed, {} acked",
            s.messages_published, s.messages_routed, s.deliveries, s.delivery_failures, s.acks
        );
        info!(
            "Compactions: {}, active connections: {}, uptime: {}s",
            s.compactions, s.active_connections, s.uptime_secs
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub messages_routed: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub acks: u64,
    pub compactions: u64,
    pub active_connections: usize,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
