pub mod settings;

use crate::storage::CompactionPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    /// Prefix applied to every exchange and queue name
    pub virtual_host: String,
    /// Size of the consumer delivery pool
    pub worker_threads: usize,
    pub max_frame_size: usize,

    // Queue log compaction
    pub compact_min_records: u64,
    pub compact_valid_ratio: f64,

    /// Seconds between metric snapshots in the log; 0 disables reporting
    pub metrics_report_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
            data_dir: "./data".to_string(),
            virtual_host: "default".to_string(),
            worker_threads: 4,
            max_frame_size: 64 * 1024 * 1024, // 64MB

            compact_min_records: 2000,
            compact_valid_ratio: 0.5,

            metrics_report_interval_secs: 60,
        }
    }
}

impl BrokerConfig {
    /// Root the data directory somewhere else, e.g. a test's temp dir
    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_virtual_host(mut self, name: impl Into<String>) -> Self {
        self.virtual_host = name.into();
        self
    }

    pub fn compaction_policy(&self) -> CompactionPolicy {
        CompactionPolicy {
            min_records: self.compact_min_records,
            valid_ratio: self.compact_valid_ratio,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration bounds to prevent empty pools and degenerate compaction
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.worker_threads == 0 {
            return Err("worker_threads must be > 0".to_string());
        }
        if self.max_frame_size == 0 || self.max_frame_size > i32::MAX as usize {
            return Err(format!("max_frame_size must be in 1..={}", i32::MAX));
        }
        if !(self.compact_valid_ratio > 0.0 && self.compact_valid_ratio <= 1.0) {
            return Err("compact_valid_ratio must be in (0, 1]".to_string());
        }
        if self.virtual_host.is_empty() {
            return Err("virtual_host must not be empty".to_string());
        }
        if self.virtual_host.contains(['/', '\\']) {
            return Err("virtual_host must not contain path separators".to_string());
        }
        Ok(())
    }
}
